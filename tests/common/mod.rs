//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::PathBuf;
use tempfile::TempDir;
use thrustlog_core::core::sink::Sinks;
use thrustlog_core::core::transport::{
    BoxedRead, BoxedWrite, Connection, TransportError, TransportTrait, TransportType,
};
use thrustlog_core::SampleLayout;

/// Raw log and sample table inside a temp dir
pub struct OutputFiles {
    pub dir: TempDir,
    pub raw_log: PathBuf,
    pub samples: PathBuf,
}

impl OutputFiles {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let raw_log = dir.path().join("eng.log");
        let samples = dir.path().join("eng.csv");
        Self {
            dir,
            raw_log,
            samples,
        }
    }

    pub fn sinks(&self, layout: SampleLayout) -> Sinks {
        Sinks::create_files(&self.raw_log, &self.samples, layout).unwrap()
    }

    pub fn raw(&self) -> String {
        std::fs::read_to_string(&self.raw_log).unwrap()
    }

    pub fn table(&self) -> String {
        std::fs::read_to_string(&self.samples).unwrap()
    }
}

/// Transport handing out a prepared read/write pair once
pub struct ScriptedTransport {
    parts: Option<(BoxedRead, BoxedWrite)>,
}

impl ScriptedTransport {
    pub fn new(reader: BoxedRead, writer: BoxedWrite) -> Self {
        Self {
            parts: Some((reader, writer)),
        }
    }
}

#[async_trait]
impl TransportTrait for ScriptedTransport {
    async fn open(&mut self) -> Result<Connection, TransportError> {
        let (reader, writer) = self
            .parts
            .take()
            .ok_or_else(|| TransportError::PortInUse("scripted".into()))?;
        Ok(Connection::new("scripted", reader, writer))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Memory
    }

    fn connection_info(&self) -> String {
        "scripted".into()
    }
}
