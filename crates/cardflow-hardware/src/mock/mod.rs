//! Mock reader implementation for testing and development.
//!
//! This module provides a simulated card reader that can be controlled
//! programmatically without requiring physical hardware.

pub mod reader;

// Re-export commonly used types
pub use reader::{
    MOCK_APPLICATIONS, MOCK_PAN, MOCK_READ_FAILURE_MESSAGE, MOCK_READER_NAME, MockCardReader,
    MockCardReaderHandle, MockReaderConfig, SECOND_MOCK_READER_NAME,
};
