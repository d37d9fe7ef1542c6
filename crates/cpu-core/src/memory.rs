use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MemError {
    #[error("address {0:#x} out of range")] OutOfRange(u64),
}

/// Guest memory as seen by descriptor-table and IDT walks.
pub trait Memory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemError>;
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MemError>;
}

#[derive(Clone, Serialize, Deserialize)]
pub struct FlatMem {
    data: Vec<u8>,
}

impl FlatMem {
    pub fn new(size: usize) -> Self { Self { data: vec![0u8; size] } }
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
}

impl core::fmt::Debug for FlatMem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlatMem").field("len", &self.data.len()).finish()
    }
}

impl Memory for FlatMem {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemError> {
        let a = usize::try_from(addr).map_err(|_| MemError::OutOfRange(addr))?;
        let end = a.checked_add(buf.len()).ok_or(MemError::OutOfRange(addr))?;
        buf.copy_from_slice(self.data.get(a..end).ok_or(MemError::OutOfRange(addr))?);
        Ok(())
    }
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MemError> {
        let a = usize::try_from(addr).map_err(|_| MemError::OutOfRange(addr))?;
        let end = a.checked_add(data.len()).ok_or(MemError::OutOfRange(addr))?;
        let slice = self.data.get_mut(a..end).ok_or(MemError::OutOfRange(addr))?;
        slice.copy_from_slice(data);
        Ok(())
    }
}
