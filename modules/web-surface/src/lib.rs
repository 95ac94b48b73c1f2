//! Web surface of the target: the crawler and what the response headers
//! give away.

pub mod links;
pub mod spider;
pub mod webserver;

pub use spider::SfpSpider;
pub use webserver::SfpWebserver;

use spiderfoot_core::PluginRegistry;

pub fn register(registry: &mut PluginRegistry) {
    registry.register(SfpSpider::boxed).register(SfpWebserver::boxed);
}
