pub mod traits;
pub mod wallabag;
pub mod dry_run;

pub use traits::Delivery;
pub use self::wallabag::WallabagDelivery;
pub use dry_run::DryRunDelivery;

#[cfg(test)]
pub use traits::MockDelivery;
