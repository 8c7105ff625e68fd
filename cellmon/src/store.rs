//! JSON file persistence for readings and the operator catalog.

use crate::reading::{Observation, Reading};
use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{error, info};

pub const READINGS_FILE: &str = "network_readings.json";
pub const OPERATORS_FILE: &str = "network_operators.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).await.map_err(|source| StoreError::Io {
        path: path.to_owned(),
        source,
    })?;

    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_owned(),
        source,
    })
}

/// Writes to a sibling temp file first so a crash never leaves half a file.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_owned(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| StoreError::Io {
        path: path.to_owned(),
        source,
    };

    fs::write(&tmp, json).await.map_err(io_err)?;
    fs::rename(&tmp, path).await.map_err(io_err)
}

async fn ensure_file<T: Serialize>(path: &Path, initial: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await.map_err(|source| StoreError::Io {
            path: dir.to_owned(),
            source,
        })?;
    }
    let exists = fs::try_exists(path).await.map_err(|source| StoreError::Io {
        path: path.to_owned(),
        source,
    })?;
    if !exists {
        write_json(path, initial).await?;
    }

    Ok(())
}

/// Append-only collection of [`Reading`]s backed by a single JSON array.
///
/// Every write rewrites the whole file; the internal lock serializes writers
/// within the process.
pub struct ReadingStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ReadingStore {
    /// Opens the store, creating an empty file if none exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_file(&path, &Vec::<Reading>::new()).await?;

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists `observation` with the next id and the current local time.
    pub async fn save(&self, observation: Observation) -> Result<Reading> {
        self.save_at(observation, Local::now().naive_local()).await
    }

    pub async fn save_at(
        &self,
        observation: Observation,
        timestamp: NaiveDateTime,
    ) -> Result<Reading> {
        let _guard = self.lock.lock().await;

        let result = async {
            let mut readings: Vec<Reading> = read_json(&self.path).await?;
            let id = readings.iter().map(|r| r.id).max().unwrap_or(0) + 1;
            let reading = Reading {
                id,
                timestamp,
                observation,
            };
            readings.push(reading.clone());
            write_json(&self.path, &readings).await?;

            Ok::<_, StoreError>(reading)
        }
        .await;

        match &result {
            Ok(reading) => info!(id = reading.id, operator = %reading.observation.operator, "saved reading"),
            Err(e) => error!(error = %e, "failed to save reading"),
        }

        result
    }

    /// Persists readings taken earlier, keeping each one's own timestamp.
    /// Ids are reassigned by the store.
    pub async fn save_sampled(&self, readings: Vec<Reading>) -> Result<Vec<Reading>> {
        let mut saved = Vec::with_capacity(readings.len());
        for reading in readings {
            saved.push(self.save_at(reading.observation, reading.timestamp).await?);
        }

        Ok(saved)
    }

    pub async fn all(&self) -> Result<Vec<Reading>> {
        let _guard = self.lock.lock().await;
        read_json(&self.path).await
    }

    pub async fn latest(&self) -> Result<Option<Reading>> {
        Ok(self.all().await?.pop())
    }

    /// Readings at most `days` old.
    pub async fn since(&self, days: u32) -> Result<Vec<Reading>> {
        self.since_from(Local::now().naive_local(), days).await
    }

    /// A window reaching past the earliest representable date keeps everything.
    pub async fn since_from(&self, now: NaiveDateTime, days: u32) -> Result<Vec<Reading>> {
        let cutoff = TimeDelta::try_days(i64::from(days)).and_then(|d| now.checked_sub_signed(d));
        let mut readings = self.all().await?;
        if let Some(cutoff) = cutoff {
            readings.retain(|r| r.timestamp >= cutoff);
        }

        Ok(readings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: u32,
    pub name: String,
    pub country_code: String,
    pub network_code: String,
}

/// Read-only reference list of known network operators.
pub struct OperatorsCatalog {
    path: PathBuf,
}

impl OperatorsCatalog {
    /// Opens the catalog, seeding it on first run.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_file(&path, &default_operators()).await?;

        Ok(Self { path })
    }

    pub async fn list(&self) -> Result<Vec<Operator>> {
        read_json(&self.path).await
    }
}

pub fn default_operators() -> Vec<Operator> {
    vec![
        Operator {
            id: 1,
            name: "MTN".into(),
            country_code: "NG".into(),
            network_code: "003".into(),
        },
        Operator {
            id: 2,
            name: "Glo".into(),
            country_code: "NG".into(),
            network_code: "005".into(),
        },
    ]
}
