//! Testing helpers and mock utilities.
//!
//! Provides convenient constructors for mocked shortlink, relay and storage providers.

use crate::relay::{MockContentRelay, RelayError};
use crate::shortlink::{MockShortener, ShortlinkError};
use crate::storage::{MockRelayStore, StorageError};

/// Create a mock shortener that always answers with `short_link`.
#[must_use]
pub fn mock_shortener_fixed(short_link: &'static str) -> MockShortener {
    let mut mock = MockShortener::new();
    mock.expect_shorten()
        .returning(move |_| Ok(short_link.to_string()));
    mock
}

/// Create a mock shortener whose provider is always unreachable.
#[must_use]
pub fn mock_shortener_failing() -> MockShortener {
    let mut mock = MockShortener::new();
    mock.expect_shorten()
        .returning(|_| Err(ShortlinkError::Network("connection refused".to_string())));
    mock
}

/// Create a mock relay that copies every message as message `message_id`.
#[must_use]
pub fn mock_relay_ok(message_id: i32) -> MockContentRelay {
    let mut mock = MockContentRelay::new();
    mock.expect_relay()
        .returning(move |_, _| Ok(message_id));
    mock
}

/// Create a mock relay whose source messages have all been deleted.
#[must_use]
pub fn mock_relay_unavailable() -> MockContentRelay {
    let mut mock = MockContentRelay::new();
    mock.expect_relay()
        .returning(|_, _| Err(RelayError::Unavailable("message to copy not found".to_string())));
    mock
}

/// Create a mock store that fails as if R2 were down.
///
/// Stubs the calls each gate and sweeper entry point makes first: `get_file`,
/// `redeem_token`, `find_token` and `delete_expired_tokens`. Any other call is
/// an unexpected-call panic.
#[must_use]
pub fn mock_store_unavailable() -> MockRelayStore {
    let mut mock = MockRelayStore::new();
    mock.expect_get_file()
        .returning(|_| Err(StorageError::S3List("bucket unreachable".to_string())));
    mock.expect_redeem_token()
        .returning(|_, _, _| Err(StorageError::S3List("bucket unreachable".to_string())));
    mock.expect_find_token()
        .returning(|_, _| Err(StorageError::S3List("bucket unreachable".to_string())));
    mock.expect_delete_expired_tokens()
        .returning(|_| Err(StorageError::S3List("bucket unreachable".to_string())));
    mock
}
