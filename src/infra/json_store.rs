use crate::domain::{DeployRecord, DeployState, Instance, Store};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    instances: BTreeMap<String, Instance>,
    #[serde(default)]
    records: Vec<DeployRecord>,
    #[serde(default)]
    counters: BTreeMap<String, u64>,
}

/// Store kept in a single JSON document, rewritten after every change.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).with_context(|| format!("creating {:?}", state_dir))?;
        let path = state_dir.join(STATE_FILE_NAME);
        let data = if path.exists() {
            let content =
                fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
            serde_json::from_str(&content).with_context(|| format!("parsing {:?}", path))?
        } else {
            StoreData::default()
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("state store lock poisoned"))
    }

    /// Applies `change` to a copy and keeps it only once it is on disk.
    fn update<T>(&self, change: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut data = self.lock()?;
        let mut next = data.clone();
        let value = change(&mut next)?;
        let content = serde_json::to_string_pretty(&next).context("serializing state")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).with_context(|| format!("writing {:?}", tmp))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replacing {:?}", self.path))?;
        *data = next;
        Ok(value)
    }
}

impl Store for JsonStore {
    fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.lock()?.instances.values().cloned().collect())
    }

    fn instance(&self, label: &str) -> Result<Option<Instance>> {
        Ok(self.lock()?.instances.get(label).cloned())
    }

    fn save_instance(&self, instance: &Instance) -> Result<()> {
        self.update(|data| {
            data.instances
                .insert(instance.label.clone(), instance.clone());
            Ok(())
        })
    }

    fn delete_instance(&self, label: &str) -> Result<()> {
        self.update(|data| {
            data.instances.remove(label);
            Ok(())
        })
    }

    fn add_record(&self, mut record: DeployRecord) -> Result<u64> {
        self.update(|data| {
            let id = data.records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
            record.id = id;
            data.records.push(record);
            Ok(id)
        })
    }

    fn records(&self, state: Option<DeployState>) -> Result<Vec<DeployRecord>> {
        Ok(self
            .lock()?
            .records
            .iter()
            .filter(|r| state.is_none_or(|s| r.state == s))
            .cloned()
            .collect())
    }

    fn set_record_state(&self, id: u64, state: DeployState) -> Result<()> {
        self.update(|data| {
            let record = data
                .records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| anyhow!("no deploy record {id}"))?;
            record.state = state;
            record.modified = Utc::now();
            Ok(())
        })
    }

    fn next_counter(&self, name: &str) -> Result<u64> {
        self.update(|data| {
            let counter = data.counters.entry(name.to_string()).or_insert(0);
            *counter += 1;
            Ok(*counter)
        })
    }
}
