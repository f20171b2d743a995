//! Concrete sources: the deterministic paper broker and the public web feed.

mod paper;
mod web;

pub use paper::PaperBroker;
pub use web::WebFeedSource;
