//! SeaORM entities mapping to database tables, one module per table.

pub mod account;
pub mod campaign;
pub mod queue_job;
pub mod subscription_plan;
pub mod target;
pub mod user;
pub mod user_subscription;

// Prelude module for easy importing of all entities and their related types.
pub mod prelude {
    pub use super::account::Entity as Account;
    pub use super::account::Model as AccountModel;

    pub use super::campaign::Entity as Campaign;
    pub use super::campaign::Model as CampaignModel;

    pub use super::queue_job::Entity as QueueJob;
    pub use super::queue_job::Model as QueueJobModel;

    pub use super::subscription_plan::Entity as SubscriptionPlan;
    pub use super::subscription_plan::Model as SubscriptionPlanModel;

    pub use super::target::Entity as Target;
    pub use super::target::Model as TargetModel;

    pub use super::user::Entity as User;
    pub use super::user::Model as UserModel;

    pub use super::user_subscription::Entity as UserSubscription;
    pub use super::user_subscription::Model as UserSubscriptionModel;
}
