pub mod types;
pub mod user_profiles;
pub mod subscriptions;
pub mod deployments;
pub mod update_history;

pub mod prelude {
    pub use super::deployments::Entity as Deployments;
    pub use super::subscriptions::Entity as Subscriptions;
    pub use super::update_history::Entity as UpdateHistory;
    pub use super::user_profiles::Entity as UserProfiles;
}
