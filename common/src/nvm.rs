use log::{debug, info};

use crate::{error::NvmError, fingerprint::Fingerprint, profile::ButtonId};

/// Total bytes of non-volatile memory the cycle state occupies.
pub const NVM_SIZE: usize = 21;

/// Named regions of the persisted layout. Offsets and lengths never change at
/// runtime; a layout change means a firmware migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmKey {
    Fingerprint,
    WakeButton,
}

impl NvmKey {
    pub const fn offset(self) -> usize {
        match self {
            Self::Fingerprint => 0,
            Self::WakeButton => 20,
        }
    }

    pub const fn len(self) -> usize {
        match self {
            Self::Fingerprint => Fingerprint::LEN,
            Self::WakeButton => 1,
        }
    }

    /// Whether an all-zero region reads back as absent.
    pub const fn zero_is_absent(self) -> bool {
        match self {
            Self::Fingerprint | Self::WakeButton => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fingerprint => "fingerprint",
            Self::WakeButton => "wake_button",
        }
    }
}

/// Raw byte-addressed storage that survives deep sleep and reset.
pub trait NvmBacking {
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), NvmError>;
    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), NvmError>;
}

/// Zero-initialized in-memory backing, the state of a freshly flashed device.
#[derive(Debug, Clone)]
pub struct MemoryNvm {
    bytes: [u8; NVM_SIZE],
}

impl Default for MemoryNvm {
    fn default() -> Self {
        Self {
            bytes: [0; NVM_SIZE],
        }
    }
}

impl MemoryNvm {
    pub fn from_bytes(bytes: [u8; NVM_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; NVM_SIZE] {
        &self.bytes
    }
}

impl NvmBacking for MemoryNvm {
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), NvmError> {
        let region = self
            .bytes
            .get(offset..offset + buf.len())
            .ok_or_else(|| NvmError::Read(format!("range {offset}+{} out of bounds", buf.len())))?;
        buf.copy_from_slice(region);
        Ok(())
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), NvmError> {
        let region = self
            .bytes
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| NvmError::Write(format!("range {offset}+{} out of bounds", data.len())))?;
        region.copy_from_slice(data);
        Ok(())
    }
}

/// Key-addressed codec over an [`NvmBacking`].
pub struct NvmStore<'a> {
    backing: &'a mut dyn NvmBacking,
}

impl<'a> NvmStore<'a> {
    pub fn new(backing: &'a mut dyn NvmBacking) -> Self {
        Self { backing }
    }

    pub fn read(&mut self, key: NvmKey) -> Result<Option<Vec<u8>>, NvmError> {
        let mut buffer = vec![0_u8; key.len()];
        self.backing.read_at(key.offset(), &mut buffer)?;

        if key.zero_is_absent() && buffer.iter().all(|byte| *byte == 0) {
            return Ok(None);
        }
        Ok(Some(buffer))
    }

    /// Writes `value` into the key's region; `None` zero-fills it.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not exactly the region's length.
    pub fn write(&mut self, key: NvmKey, value: Option<&[u8]>) -> Result<(), NvmError> {
        let zeroed;
        let buffer = match value {
            Some(bytes) => bytes,
            None => {
                debug!("coercing nvm {} to an empty region", key.as_str());
                zeroed = vec![0_u8; key.len()];
                &zeroed
            }
        };

        assert_eq!(
            buffer.len(),
            key.len(),
            "nvm {} region is {} bytes",
            key.as_str(),
            key.len()
        );
        self.backing.write_at(key.offset(), buffer)
    }

    pub fn fingerprint(&mut self) -> Result<Option<Fingerprint>, NvmError> {
        Ok(self
            .read(NvmKey::Fingerprint)?
            .and_then(|bytes| Fingerprint::from_slice(&bytes)))
    }

    /// Persists the digest of `tag`, or clears the record when `tag` is absent.
    pub fn persist_tag(&mut self, tag: Option<&str>) -> Result<(), NvmError> {
        let fingerprint = tag.map(Fingerprint::of);
        match (&fingerprint, tag) {
            (Some(fingerprint), Some(tag)) => info!("persisting etag {tag} as {fingerprint}"),
            _ => info!("clearing persisted etag"),
        }
        self.write(
            NvmKey::Fingerprint,
            fingerprint.as_ref().map(Fingerprint::as_bytes),
        )
    }

    pub fn wake_button(&mut self) -> Result<Option<ButtonId>, NvmError> {
        Ok(self
            .read(NvmKey::WakeButton)?
            .and_then(|bytes| bytes.first().copied())
            .map(ButtonId::from_ascii))
    }

    pub fn persist_wake_button(&mut self, button: Option<ButtonId>) -> Result<(), NvmError> {
        let encoded = button.map(|button| [button.as_ascii()]);
        self.write(NvmKey::WakeButton, encoded.as_ref().map(|bytes| &bytes[..]))
    }
}
