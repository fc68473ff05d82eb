pub mod mock_http;
pub mod scripted_transport;
