use log::info;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderDecision {
    pub render: bool,
    /// Raw tag to persist after a render; `None` clears the fingerprint.
    pub tag: Option<String>,
}

/// Decides whether freshly fetched content needs to be drawn.
pub fn should_render(
    always_render: bool,
    fetched_tag: Option<&str>,
    persisted: Option<&Fingerprint>,
) -> RenderDecision {
    if always_render {
        info!("always-render is set; treating the etag as changed");
        return RenderDecision {
            render: true,
            tag: None,
        };
    }

    let tag = fetched_tag.map(str::to_string);
    let render = match (fetched_tag, persisted) {
        (None, _) => {
            info!("no etag in payload");
            true
        }
        (Some(_), None) => {
            info!("no persisted etag");
            true
        }
        (Some(fetched), Some(persisted)) if !persisted.matches(fetched) => {
            info!("etag has changed: was {persisted}, is now {fetched}");
            true
        }
        (Some(_), Some(_)) => false,
    };

    RenderDecision { render, tag }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_without_a_fetched_tag() {
        let persisted = Fingerprint::of("\"v1\"");
        assert_eq!(
            should_render(false, None, Some(&persisted)),
            RenderDecision {
                render: true,
                tag: None,
            }
        );
    }

    #[test]
    fn renders_on_first_run() {
        assert_eq!(
            should_render(false, Some("\"v1\""), None),
            RenderDecision {
                render: true,
                tag: Some("\"v1\"".to_string()),
            }
        );
    }

    #[test]
    fn skips_only_when_digest_matches() {
        let persisted = Fingerprint::of("\"v1\"");
        assert!(!should_render(false, Some("\"v1\""), Some(&persisted)).render);
        assert!(should_render(false, Some("\"v2\""), Some(&persisted)).render);
    }

    #[test]
    fn skipped_decision_still_carries_the_tag() {
        let persisted = Fingerprint::of("\"v1\"");
        assert_eq!(
            should_render(false, Some("\"v1\""), Some(&persisted)).tag.as_deref(),
            Some("\"v1\"")
        );
    }

    #[test]
    fn always_render_forgets_the_tag() {
        let persisted = Fingerprint::of("\"v1\"");
        assert_eq!(
            should_render(true, Some("\"v1\""), Some(&persisted)),
            RenderDecision {
                render: true,
                tag: None,
            }
        );
    }
}
