// canaria-test-utils: a scriptable mock upstream WebSocket server for
// exercising feed connector reconnect/backoff/inactivity logic without a
// real JMA or P2P relay.

pub mod mock_upstream;

pub use mock_upstream::{MockUpstream, UpstreamScript};
