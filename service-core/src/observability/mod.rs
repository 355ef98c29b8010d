pub mod logging;
pub mod trace_context;

pub use logging::{LogFormat, init_tracing};
pub use trace_context::{
    REQUEST_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER, TracedClientExt, TracedRequest,
    outbound_trace_headers,
};
