//! Enum wrapper for card reader dispatch.
//!
//! Native `async fn` in traits (RPITIT - Rust Edition 2024) are not object-safe,
//! so `Box<dyn CardReaderDevice>` is unavailable. [`AnyCardReader`] gives the
//! peripheral task a concrete type instead.
//!
//! # Examples
//!
//! ```
//! use cardflow_hardware::devices::AnyCardReader;
//! use cardflow_hardware::mock::{MockCardReader, MockReaderConfig};
//!
//! let (reader, _handle) = MockCardReader::new(MockReaderConfig::default());
//! let any_reader = AnyCardReader::Mock(reader);
//! ```

use crate::Result;
use crate::mock::MockCardReader;
use crate::traits::CardReaderDevice;
use crate::types::{CardReadStep, ReadRequest, ReaderCheck, ReaderInfo};
use cardflow_core::PaymentMethod;

/// Enum wrapper for card reader dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyCardReader {
    /// Mock card reader for development and testing.
    Mock(MockCardReader),
}

impl From<MockCardReader> for AnyCardReader {
    fn from(reader: MockCardReader) -> Self {
        Self::Mock(reader)
    }
}

impl CardReaderDevice for AnyCardReader {
    async fn discover(&mut self) -> Result<Vec<String>> {
        match self {
            Self::Mock(device) => device.discover().await,
        }
    }

    async fn connect(&mut self, name: &str) -> Result<ReaderInfo> {
        match self {
            Self::Mock(device) => device.connect(name).await,
        }
    }

    async fn check_reader(&mut self) -> Result<ReaderCheck> {
        match self {
            Self::Mock(device) => device.check_reader().await,
        }
    }

    async fn reset(&mut self) -> Result<()> {
        match self {
            Self::Mock(device) => device.reset().await,
        }
    }

    async fn wait_for_card(&mut self) -> Result<PaymentMethod> {
        match self {
            Self::Mock(device) => device.wait_for_card().await,
        }
    }

    async fn read_card(&mut self, request: &ReadRequest) -> Result<CardReadStep> {
        match self {
            Self::Mock(device) => device.read_card(request).await,
        }
    }

    async fn select_application(&mut self, index: usize) -> Result<CardReadStep> {
        match self {
            Self::Mock(device) => device.select_application(index).await,
        }
    }

    async fn battery_level(&mut self) -> Result<u8> {
        match self {
            Self::Mock(device) => device.battery_level().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::Mock(device) => device.disconnect().await,
        }
    }

    async fn get_reader_info(&self) -> Result<ReaderInfo> {
        match self {
            Self::Mock(device) => device.get_reader_info().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Mock(device) => device.is_connected(),
        }
    }
}
