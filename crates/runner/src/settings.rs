use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

/// A persisted setting, typed by the kind byte the guest passes to
/// `defaults.set`.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Data(Bytes),
    Bool(bool),
    Int(i32),
    Float(f32),
    String(String),
    StringArray(Vec<String>),
}

/// Key/value persistence consulted by the `defaults` namespace.
///
/// Keys arrive already namespaced as `"{source_key}.{key}"`.
pub trait SettingsStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<SettingValue>;

    /// Store `value`, or remove the key when `None`.
    fn set(&self, key: &str, value: Option<SettingValue>);
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, SettingValue>>,
}

impl MemorySettingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<SettingValue>) {
        let mut values = self.values.lock();
        match value {
            Some(value) => {
                values.insert(key.to_string(), value);
            }
            None => {
                values.remove(key);
            }
        }
    }
}

pub(crate) fn namespaced_key(source_key: &str, key: &str) -> String {
    format!("{source_key}.{key}")
}
