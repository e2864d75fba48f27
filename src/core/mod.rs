//! Core Infrastructure
//!
//! HTTP transport and time source abstractions.

pub mod clock;
pub mod transport;

pub use clock::{Clock, MockClock, SystemClock};
pub use transport::{
    create_mock_transport, create_transport, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, MockHttpTransport, ReqwestHttpTransport,
};
