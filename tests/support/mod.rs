use std::sync::Arc;

use archive_gateway::test_support::MockTransport;
use archive_gateway::{ArchiveClient, ClientConfig, MemoryTokenStore, RequestDispatcher, TokenPair};

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A dispatcher over a mock transport, optionally logged in with `pair`
#[allow(dead_code)]
pub fn dispatcher_with(
    pair: Option<TokenPair>,
) -> (Arc<RequestDispatcher>, Arc<MockTransport>, Arc<MemoryTokenStore>) {
    let transport = Arc::new(MockTransport::new());
    let tokens = Arc::new(match pair {
        Some(pair) => MemoryTokenStore::with_pair(pair),
        None => MemoryTokenStore::new(),
    });
    let dispatcher = Arc::new(RequestDispatcher::new(transport.clone(), tokens.clone()));
    (dispatcher, transport, tokens)
}

/// A full client over a mock transport, staging exports in `config.staging_dir`
#[allow(dead_code)]
pub fn client_with(
    config: &ClientConfig,
    pair: Option<TokenPair>,
) -> (ArchiveClient, Arc<MockTransport>, Arc<MemoryTokenStore>) {
    let transport = Arc::new(MockTransport::new());
    let tokens = Arc::new(match pair {
        Some(pair) => MemoryTokenStore::with_pair(pair),
        None => MemoryTokenStore::new(),
    });
    let client = ArchiveClient::new(config, transport.clone(), tokens.clone());
    (client, transport, tokens)
}
