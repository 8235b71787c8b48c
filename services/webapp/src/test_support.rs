//! In-memory stores with failure switches for tests.

use crate::metadata_store::{HealthCheck, ImageRecord, MetadataStore};
use crate::object_store::{ObjectStore, PutObject};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct ObjectState {
    objects: HashMap<String, PutObject>,
    deleted: Vec<String>,
}

#[derive(Clone)]
pub struct MemoryObjectStore {
    url_base: String,
    state: Arc<Mutex<ObjectState>>,
    fail_puts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    put_ack_delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryObjectStore {
    pub fn new(url_base: &str) -> Self {
        Self {
            url_base: url_base.to_string(),
            state: Arc::default(),
            fail_puts: Arc::default(),
            fail_deletes: Arc::default(),
            put_ack_delay: Arc::default(),
        }
    }

    /// Store each object immediately but hold back the acknowledgement
    pub fn set_put_ack_delay(&self, delay: Duration) {
        *self.put_ack_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<PutObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().objects.is_empty()
    }

    /// Keys passed to successful deletes, in call order
    pub fn deleted_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, object: PutObject) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            bail!("simulated object store put failure");
        }
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(object.key.clone(), object);
        sleep_for(&self.put_ack_delay).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("simulated object store delete failure");
        }
        let mut state = self.state.lock().unwrap();
        state.objects.remove(key);
        state.deleted.push(key.to_string());
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_base, key)
    }
}

#[derive(Default)]
struct RecordState {
    images: HashMap<Uuid, ImageRecord>,
    health_checks: Vec<HealthCheck>,
}

#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    state: Arc<Mutex<RecordState>>,
    fail_inserts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    fail_health_checks: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
    insert_ack_delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_health_checks(&self, fail: bool) {
        self.fail_health_checks.store(fail, Ordering::SeqCst);
    }

    /// Delay every call before it touches any state
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Commit image inserts immediately but hold back the acknowledgement
    pub fn set_insert_ack_delay(&self, delay: Duration) {
        *self.insert_ack_delay.lock().unwrap() = Some(delay);
    }

    pub fn image(&self, id: Uuid) -> Option<ImageRecord> {
        self.state.lock().unwrap().images.get(&id).cloned()
    }

    pub fn image_count(&self) -> usize {
        self.state.lock().unwrap().images.len()
    }

    pub fn health_check_count(&self) -> usize {
        self.state.lock().unwrap().health_checks.len()
    }

    async fn pause(&self) {
        sleep_for(&self.delay).await;
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_image(&self, record: &ImageRecord) -> Result<()> {
        self.pause().await;
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("simulated metadata insert failure");
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.images.contains_key(&record.id) {
                bail!("duplicate key value violates unique constraint \"images_pkey\"");
            }
            state.images.insert(record.id, record.clone());
        }
        sleep_for(&self.insert_ack_delay).await;
        Ok(())
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<ImageRecord>> {
        self.pause().await;
        Ok(self.image(id))
    }

    async fn delete_image(&self, id: Uuid) -> Result<bool> {
        self.pause().await;
        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("simulated metadata delete failure");
        }
        Ok(self.state.lock().unwrap().images.remove(&id).is_some())
    }

    async fn record_health_check(&self) -> Result<HealthCheck> {
        self.pause().await;
        if self.fail_health_checks.load(Ordering::SeqCst) {
            bail!("simulated database outage");
        }
        let mut state = self.state.lock().unwrap();
        let check = HealthCheck {
            check_id: state.health_checks.len() as i64 + 1,
            checked_at: Utc::now(),
        };
        state.health_checks.push(check.clone());
        Ok(check)
    }
}

async fn sleep_for(delay: &Mutex<Option<Duration>>) {
    let delay = *delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}
