// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for lifecycle tests: a real store on a temp dir, the
//! fake sandbox driver, and a recording gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use vea_core::{AppId, ApplicationRecord, FakeClock, SignalSpec, SignalValue, ValidationReport};
use vea_store::{Store, StoreConfig};

use crate::config::Config;
use crate::console::ConsoleHub;
use crate::sandbox::FakeSandbox;
use crate::signals::{
    session_fingerprint, Catalog, SessionToken, SignalError, SignalGateway, SignalUpdate,
};

use super::{DeploySpec, LifecycleCore};

/// Gateway double that records session traffic and can fail opens.
#[derive(Default)]
pub(crate) struct RecordingGateway {
    pub opened: Mutex<Vec<String>>,
    pub closed: Mutex<Vec<String>>,
    pub fail_open: AtomicBool,
}

impl RecordingGateway {
    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalGateway for RecordingGateway {
    fn validate(&self, signals: &[SignalSpec]) -> ValidationReport {
        Catalog::builtin().validate(signals)
    }

    async fn open_session(&self, record: &ApplicationRecord) -> Result<SessionToken, SignalError> {
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(SignalError::Broker("scripted failure".to_string()));
        }
        self.opened.lock().push(record.app_id.as_str().to_string());
        Ok(SessionToken {
            app_id: record.app_id.clone(),
            fingerprint: session_fingerprint(record),
        })
    }

    async fn subscribe(
        &self,
        _session: &SessionToken,
        _spec: &SignalSpec,
        _tx: mpsc::Sender<SignalUpdate>,
    ) -> Result<(), SignalError> {
        Ok(())
    }

    async fn read(
        &self,
        _session: &SessionToken,
        _paths: &[String],
    ) -> Result<Vec<SignalUpdate>, SignalError> {
        Ok(Vec::new())
    }

    async fn write(
        &self,
        _session: &SessionToken,
        _path: &str,
        _value: SignalValue,
    ) -> Result<(), SignalError> {
        Ok(())
    }

    async fn close_session(&self, app_id: &AppId) {
        self.closed.lock().push(app_id.as_str().to_string());
    }
}

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub store: Arc<Store>,
    pub driver: FakeSandbox,
    pub gateway: Arc<RecordingGateway>,
    pub clock: FakeClock,
    pub core: LifecycleCore<FakeClock>,
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(|_| {})
}

pub(crate) fn fixture_with(tune: impl FnOnce(&mut Config)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config { data_dir: dir.path().to_path_buf(), ..Config::default() };
    tune(&mut config);

    let store = Arc::new(Store::open(StoreConfig::under(&config.data_dir)).unwrap());
    let driver = FakeSandbox::new();
    let gateway = Arc::new(RecordingGateway::default());
    let clock = FakeClock::new();
    let console =
        Arc::new(ConsoleHub::new(Arc::new(driver.clone()), Arc::clone(&store), clock.clone()));
    let core = LifecycleCore::new(
        config.clone(),
        Arc::clone(&store),
        Arc::new(driver.clone()),
        Arc::clone(&gateway) as Arc<dyn SignalGateway>,
        console,
        clock.clone(),
    );

    Fixture { dir, config, store, driver, gateway, clock, core }
}

impl Fixture {
    /// A second core over the same store and driver, as if the
    /// supervisor restarted: fresh live map, fresh console hub.
    pub fn restarted(&self) -> LifecycleCore<FakeClock> {
        let console = Arc::new(ConsoleHub::new(
            Arc::new(self.driver.clone()),
            Arc::clone(&self.store),
            self.clock.clone(),
        ));
        LifecycleCore::new(
            self.config.clone(),
            Arc::clone(&self.store),
            Arc::new(self.driver.clone()),
            Arc::clone(&self.gateway) as Arc<dyn SignalGateway>,
            console,
            self.clock.clone(),
        )
    }
}

/// A script deploy with auto-start, ready to customize.
pub(crate) fn deploy_spec(app_id: &str) -> DeploySpec {
    DeploySpec {
        app_id: app_id.to_string(),
        name: None,
        kind: vea_core::AppKind::Script,
        version: Some("1.0.0".to_string()),
        artifact: "print('hello')".to_string(),
        dependencies: Vec::new(),
        signals: Vec::new(),
        cpu_share: None,
        memory_bytes: None,
        auto_start: true,
    }
}
