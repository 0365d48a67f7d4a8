pub mod backoff;

pub use backoff::backoff_delay;
