pub mod correlation;

pub use correlation::{trace_id_middleware, TRACE_ID_HEADER};
