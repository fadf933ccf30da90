//! End-to-end tests through the HTTP router.

mod mock_extractor;
mod dashboard_flow;
