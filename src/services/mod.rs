/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Question-fetch surface backed by the shared supply.
pub mod question_service;
/// Game lifecycle operations issued by players.
pub mod session_service;
/// Bridge from game bus events to SSE payloads.
pub mod sse_events;
/// Server-Sent Events streaming service.
pub mod sse_service;
