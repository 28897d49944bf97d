//! `defaults`: persisted per-source settings.

use serde::de::DeserializeOwned;
use wasmtime::Caller;

use super::{Capability, Registrar, context};
use crate::{
    error::{Error, Result},
    internal::abi,
    memory::{GuestMemory, guest_offset},
    settings::{SettingValue, namespaced_key},
    state::HostState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum Status {
    InvalidKey = -1,
    InvalidValue = -2,
    FailedEncoding = -3,
    FailedDecoding = -4,
}

/// Value kind selector passed to `defaults.set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Data,
    Bool,
    Int,
    Float,
    String,
    StringArray,
    Null,
}

impl Kind {
    const fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Data,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Float,
            4 => Self::String,
            5 => Self::StringArray,
            6 => Self::Null,
            _ => return None,
        })
    }

    fn decode(self, data: Vec<u8>) -> Result<Option<SettingValue>> {
        fn wire<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
            sourcebridge_codec::from_bytes(data).map_err(Error::Decode)
        }
        Ok(Some(match self {
            Self::Data => SettingValue::Data(data.into()),
            Self::Bool => SettingValue::Bool(wire(&data)?),
            Self::Int => SettingValue::Int(wire(&data)?),
            Self::Float => SettingValue::Float(wire(&data)?),
            Self::String => SettingValue::String(wire(&data)?),
            Self::StringArray => SettingValue::StringArray(wire(&data)?),
            Self::Null => return Ok(None),
        }))
    }
}

pub struct Defaults;

impl Capability for Defaults {
    fn namespace(&self) -> &'static str {
        "defaults"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        registrar.func("get", get).func("set", set);
    }
}

fn read_key(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<String> {
    let memory = GuestMemory::from_caller(caller)?;
    memory.read_str(&*caller, guest_offset(ptr)?, guest_offset(len)?)
}

fn get(mut caller: Caller<'_, HostState>, key_ptr: i32, key_len: i32) -> i32 {
    if key_ptr < 0 || key_len < 0 {
        return Status::InvalidKey as i32;
    }
    let Ok(key) = read_key(&mut caller, key_ptr, key_len) else {
        return Status::FailedEncoding as i32;
    };
    let ctx = context(&caller);
    let Some(value) = ctx
        .settings()
        .get(&namespaced_key(ctx.source_key(), &key))
    else {
        return Status::InvalidValue as i32;
    };
    let mut arena = ctx.arena().lock();
    let stored = match value {
        SettingValue::Data(data) => Ok(arena.store(data)),
        SettingValue::Bool(value) => arena.store_encoded(&value),
        SettingValue::Int(value) => arena.store_encoded(&value),
        SettingValue::Float(value) => arena.store_encoded(&value),
        SettingValue::String(value) => arena.store_encoded(&value),
        SettingValue::StringArray(value) => arena.store_encoded(&value),
    };
    stored.unwrap_or(Status::FailedEncoding as i32)
}

fn set(mut caller: Caller<'_, HostState>, key_ptr: i32, key_len: i32, kind: i32, value_ptr: i32) -> i32 {
    if key_ptr < 0 || key_len < 0 {
        return Status::InvalidKey as i32;
    }
    let Ok(key) = read_key(&mut caller, key_ptr, key_len) else {
        return Status::FailedDecoding as i32;
    };
    let Some(kind) = Kind::from_raw(kind) else {
        return Status::InvalidValue as i32;
    };
    let value = if kind == Kind::Null {
        None
    } else {
        let data = guest_offset(value_ptr).and_then(|ptr| {
            let memory = GuestMemory::from_caller(&mut caller)?;
            abi::read_framed(&memory, &caller, ptr)
        });
        match data.and_then(|data| kind.decode(data)) {
            Ok(value) => value,
            Err(_) => return Status::FailedDecoding as i32,
        }
    };
    let ctx = context(&caller);
    ctx.settings()
        .set(&namespaced_key(ctx.source_key(), &key), value);
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_decode_wire_values() {
        assert_eq!(
            Kind::Int.decode(vec![0x03]).expect("int"),
            Some(SettingValue::Int(-2))
        );
        assert_eq!(
            Kind::StringArray
                .decode(vec![2, 1, b'a', 0])
                .expect("array"),
            Some(SettingValue::StringArray(vec!["a".into(), String::new()]))
        );
        assert_eq!(
            Kind::Data.decode(vec![9, 9]).expect("data"),
            Some(SettingValue::Data(vec![9_u8, 9].into()))
        );
        assert_eq!(Kind::Null.decode(vec![1]).expect("null"), None);
        assert!(Kind::Bool.decode(Vec::new()).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert_eq!(Kind::from_raw(7), None);
        assert_eq!(Kind::from_raw(-1), None);
        assert_eq!(Kind::from_raw(6), Some(Kind::Null));
    }
}
