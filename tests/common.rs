//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use minikdc::config::Properties;
use minikdc::{InMemoryContext, KdcConfig, MiniKdc, Transport};
use std::io::Write;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

/// A running KDC together with the scratch directory it lives in.
pub struct TestKdc {
    pub kdc: MiniKdc,
    pub context: Arc<InMemoryContext>,
    pub base: TempDir,
}

/// Default properties with overrides applied.
pub fn properties(overrides: &[(&str, &str)]) -> Properties {
    let mut props = KdcConfig::default_properties();
    for (key, value) in overrides {
        props.insert(key.to_string(), value.to_string());
    }
    props
}

/// Configuration for an ephemeral KDC on the loopback address.
pub fn config(transport: Transport, overrides: &[(&str, &str)]) -> KdcConfig {
    let mut all = vec![("transport", transport.as_str())];
    all.extend_from_slice(overrides);
    KdcConfig::from_properties(&properties(&all)).expect("valid test configuration")
}

/// Start a KDC that publishes into an in-memory client context.
pub async fn start_kdc(config: KdcConfig) -> TestKdc {
    let base = tempfile::tempdir().expect("Failed to create temp dir");
    let context = Arc::new(InMemoryContext::new());
    let kdc = MiniKdc::with_context(config, base.path(), context.clone());
    kdc.start().await.expect("KDC should start");
    TestKdc { kdc, context, base }
}

/// Write a properties file.
pub fn properties_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".properties")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write properties");
    file
}
