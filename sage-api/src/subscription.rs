use crate::{SubscriptionId, Time, UserId};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EmailSubscription {
    pub id: SubscriptionId,

    /// Always stored normalized, see `normalize_email`
    pub email: String,

    pub user_id: Option<UserId>,
    pub is_subscribed: bool,
    pub subscribed_at: Time,
    pub unsubscribed_at: Option<Time>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewSubscription {
    pub email: String,
    pub user_id: Option<UserId>,
    pub is_subscribed: bool,
    pub subscribed_at: Time,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,

    /// A previously unsubscribed row was reactivated
    Resubscribed,
}
