//! Serialized script container

use std::io::{Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::code::Code;
use crate::error::{BytecodeError, Result};
use crate::{BYTECODE_MAGIC, BYTECODE_VERSION};

const HEADER_LEN: usize = 16;

/// A compiled script: its global code and where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// Source URL or file path
    pub source_url: String,
    /// Global code
    pub code: Arc<Code>,
}

impl Script {
    /// Wrap a global code object
    pub fn new(source_url: impl Into<String>, code: Arc<Code>) -> Self {
        Self {
            source_url: source_url.into(),
            code,
        }
    }

    /// Serialize script to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let data = serde_json::to_vec(self).map_err(invalid_data)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + data.len());
        bytes.extend_from_slice(&BYTECODE_MAGIC);
        bytes.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// Deserialize and validate a script from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = bytes.get(..HEADER_LEN).ok_or(BytecodeError::UnexpectedEnd)?;

        if header[0..8] != BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }

        let version = read_u32(&header[8..12]);
        if version != BYTECODE_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        let data_len = read_u32(&header[12..16]) as usize;
        let data = bytes
            .get(HEADER_LEN..HEADER_LEN + data_len)
            .ok_or(BytecodeError::UnexpectedEnd)?;

        let script: Script = serde_json::from_slice(data).map_err(invalid_data)?;
        script.code.validate()?;
        Ok(script)
    }

    /// Write script to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Read script from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn invalid_data(e: serde_json::Error) -> BytecodeError {
    BytecodeError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        e.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{CacheState, CodeKind};
    use crate::exception::Handler;
    use crate::instruction::Instruction;
    use crate::operand::Register;

    fn sample() -> Script {
        let mut inner = Code::builder().name("inner").param("a").register_count(2);
        inner.emit(Instruction::Return { src: Register(1) });
        let inner = Arc::new(inner.build().unwrap());

        let mut b = Code::builder().kind(CodeKind::Global).register_count(4);
        let k = b.add_string("hello");
        let name = b.add_name("x");
        let slot = b.add_cache_slot();
        let f = b.add_code(inner);
        b.emit(Instruction::LoadConst { dst: Register(1), idx: k });
        b.emit(Instruction::LoadFunction { dst: Register(2), code: f });
        b.emit(Instruction::StoreGlobal { name, src: Register(1), cache: slot });
        b.emit(Instruction::Return { src: Register(1) });
        b.add_handler(Handler::catch(0, 3, 3, Register(3)));
        Script::new("test.js", Arc::new(b.build().unwrap()))
    }

    #[test]
    fn test_script_roundtrip() {
        let script = sample();
        script
            .code
            .set_cache_state(crate::operand::CacheSlot(0), CacheState::Uncached);

        let bytes = script.to_bytes().unwrap();
        let decoded = Script::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.source_url, "test.js");
        assert_eq!(decoded.code.instructions, script.code.instructions);
        assert_eq!(decoded.code.codes.len(), 1);
        assert_eq!(decoded.code.exception_table.len(), 1);
        assert_eq!(decoded.code.names[0].as_str(), "x");
        // Feedback is runtime state and does not travel.
        assert_eq!(
            decoded.code.cache_state(crate::operand::CacheSlot(0)),
            CacheState::Uninitialized
        );
    }

    #[test]
    fn test_invalid_magic() {
        let bytes = b"INVALID\0\x01\x00\x00\x00\x00\x00\x00\x00";
        assert!(matches!(
            Script::from_bytes(bytes),
            Err(BytecodeError::InvalidMagic)
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = sample().to_bytes().unwrap();
        assert!(matches!(
            Script::from_bytes(&bytes[..bytes.len() - 1]),
            Err(BytecodeError::UnexpectedEnd)
        ));
        assert!(matches!(
            Script::from_bytes(&bytes[..8]),
            Err(BytecodeError::UnexpectedEnd)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[8] = 99;
        assert!(matches!(
            Script::from_bytes(&bytes),
            Err(BytecodeError::UnsupportedVersion(99))
        ));
    }
}
