use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    api::{
        normalize_email, EmailSubscription, Error, NewSubscription, RemoteStore, Select,
        SubscribeOutcome, Table, UserId,
    },
    Gateway,
};

impl<S: RemoteStore> Gateway<S> {
    async fn subscriptions(&self, email: &str) -> Result<Vec<EmailSubscription>, Error> {
        self.select_rows(
            Table::EmailSubscriptions,
            &Select::new()
                .eq("email", email)
                .order_by("subscribed_at", true),
        )
        .await
    }

    /// Subscribes an email address to the newsletter.
    ///
    /// Addresses are normalized, and an unsubscribed address gets its row
    /// reactivated rather than a second one.
    pub async fn subscribe_email(
        &self,
        email: &str,
        user: Option<&UserId>,
    ) -> Result<SubscribeOutcome, Error> {
        let email = normalize_email(email)?;
        let rows = self.subscriptions(&email).await?;
        if rows.iter().any(|s| s.is_subscribed) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }
        match rows.first() {
            Some(previous) => {
                let mut patch = json!({
                    "is_subscribed": true,
                    "subscribed_at": Utc::now(),
                    "unsubscribed_at": Value::Null,
                });
                if let Some(user) = user {
                    patch["user_id"] = json!(user);
                }
                let _: EmailSubscription = self
                    .update_row(Table::EmailSubscriptions, previous.id.as_str(), &patch)
                    .await?;
                Ok(SubscribeOutcome::Resubscribed)
            }
            None => {
                let _: EmailSubscription = self
                    .insert_row(
                        Table::EmailSubscriptions,
                        &NewSubscription {
                            email,
                            user_id: user.cloned(),
                            is_subscribed: true,
                            subscribed_at: Utc::now(),
                        },
                    )
                    .await?;
                Ok(SubscribeOutcome::Subscribed)
            }
        }
    }

    /// Returns `false` if the address was not subscribed
    pub async fn unsubscribe_email(&self, email: &str) -> Result<bool, Error> {
        let email = normalize_email(email)?;
        let mut res = false;
        for s in self.subscriptions(&email).await?.into_iter().filter(|s| s.is_subscribed) {
            let _: EmailSubscription = self
                .update_row(
                    Table::EmailSubscriptions,
                    s.id.as_str(),
                    &json!({ "is_subscribed": false, "unsubscribed_at": Utc::now() }),
                )
                .await?;
            res = true;
        }
        Ok(res)
    }

    pub async fn is_email_subscribed(&self, email: &str) -> Result<bool, Error> {
        let email = normalize_email(email)?;
        Ok(self
            .subscriptions(&email)
            .await?
            .iter()
            .any(|s| s.is_subscribed))
    }
}
