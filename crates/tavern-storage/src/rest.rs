//! REST backend for a Supabase-style platform: PostgREST tables, the
//! auth user endpoint, and the object storage API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, header::HeaderValue, Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tavern_types::prelude::{RoomId, UserId};

use crate::errors::StorageError;
use crate::model::{
    FoodBalance, FoodTransaction, MessageCost, MessageRecord, MindBlock, ModelConfig, Role,
};
use crate::spi::{ChatStore, DebitOutcome, ObjectStore, StoreCaps};

#[derive(Clone, Debug)]
pub struct RestConfig {
    pub base_url: Url,
    pub service_key: String,
    pub bucket: String,
    pub request_timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl AsRef<str>, service_key: impl Into<String>) -> Result<Self, StorageError> {
        let mut base_url = Url::parse(base_url.as_ref())
            .map_err(|err| StorageError::bad_request(&format!("platform base url: {err}")))?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path().trim_end_matches('/')));
        }
        Ok(Self {
            base_url,
            service_key: service_key.into(),
            bucket: "generated-images".to_string(),
            request_timeout: Duration::from_secs(15),
        })
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }
}

#[derive(Clone)]
pub struct RestStore {
    client: Client,
    config: RestConfig,
}

impl RestStore {
    pub fn new(config: RestConfig) -> Result<Self, StorageError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.service_key)
            .map_err(|err| StorageError::bad_request(&format!("service key header: {err}")))?;
        headers.insert("apikey", key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| StorageError::unknown(&format!("rest client build: {err}")))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> Result<Url, StorageError> {
        self.config
            .base_url
            .join(path)
            .map_err(|err| StorageError::bad_request(&format!("endpoint join '{path}': {err}")))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StorageError> {
        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.service_key)
            .query(query)
            .send()
            .await
            .map_err(|err| StorageError::unavailable(&format!("{table} select: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_rest_error(table, status, &body));
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|err| StorageError::unknown(&format!("{table} decode: {err}")))
    }

    async fn insert<T: Serialize>(&self, table: &str, row: &T) -> Result<(), StorageError> {
        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.service_key)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .map_err(|err| StorageError::unavailable(&format!("{table} insert: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_rest_error(table, status, &body));
        }
        Ok(())
    }
}

fn map_rest_error(table: &str, status: StatusCode, body: &str) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::not_found(&format!("{table}: {body}")),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT => {
            StorageError::bad_request(&format!("{table} rejected: {body}"))
        }
        _ => StorageError::unavailable(&format!("{table} returned {}: {}", status.as_u16(), body)),
    }
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

#[derive(Deserialize)]
struct EquippedBlockRow {
    mind_block: MindBlock,
}

#[derive(Serialize)]
struct DebitArgs<'a> {
    p_user_id: &'a str,
    p_amount: i64,
}

#[async_trait]
impl ChatStore for RestStore {
    async fn user_for_session(&self, token: &str) -> Result<Option<UserId>, StorageError> {
        let url = self.endpoint("auth/v1/user")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| StorageError::unavailable(&format!("auth user: {err}")))?;

        match response.status() {
            status if status.is_success() => {
                let user: AuthUser = response
                    .json()
                    .await
                    .map_err(|err| StorageError::unknown(&format!("auth user decode: {err}")))?;
                Ok(Some(UserId(user.id)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(map_rest_error("auth/v1/user", status, &body))
            }
        }
    }

    async fn role_by_id(&self, id: &str) -> Result<Option<Role>, StorageError> {
        let rows: Vec<Role> = self
            .select(
                "roles",
                &[
                    ("id", format!("eq.{id}")),
                    ("select", "*".into()),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn role_by_slug(&self, slug: &str) -> Result<Option<Role>, StorageError> {
        let rows: Vec<Role> = self
            .select(
                "roles",
                &[
                    ("slug", format!("eq.{slug}")),
                    ("select", "*".into()),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn models_by_ids(&self, ids: &[String]) -> Result<Vec<ModelConfig>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list = ids.join(",");
        self.select(
            "model_configs",
            &[
                ("model_id", format!("in.({list})")),
                ("select", "*".into()),
            ],
        )
        .await
    }

    async fn equipped_mind_blocks(
        &self,
        user: &UserId,
        role_id: &str,
    ) -> Result<Vec<MindBlock>, StorageError> {
        let rows: Vec<EquippedBlockRow> = self
            .select(
                "mind_block_equips",
                &[
                    ("user_id", format!("eq.{user}")),
                    ("role_id", format!("eq.{role_id}")),
                    ("select", "mind_block:mind_blocks(*)".into()),
                    ("order", "created_at.asc".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.mind_block).collect())
    }

    async fn recent_messages(
        &self,
        room: &RoomId,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        self.select(
            "messages",
            &[
                ("room_id", format!("eq.{room}")),
                ("select", "*".into()),
                ("order", "created_at.desc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StorageError> {
        self.insert("messages", message).await
    }

    async fn balance(&self, user: &UserId) -> Result<Option<FoodBalance>, StorageError> {
        let rows: Vec<FoodBalance> = self
            .select(
                "food_balances",
                &[
                    ("user_id", format!("eq.{user}")),
                    ("select", "*".into()),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn debit_if_sufficient(
        &self,
        user: &UserId,
        amount: i64,
    ) -> Result<DebitOutcome, StorageError> {
        let url = self.endpoint("rest/v1/rpc/debit_food_if_sufficient")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.service_key)
            .json(&DebitArgs {
                p_user_id: &user.0,
                p_amount: amount,
            })
            .send()
            .await
            .map_err(|err| StorageError::unavailable(&format!("debit rpc: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_rest_error("rpc/debit_food_if_sufficient", status, &body));
        }

        // The function returns the updated row, or no rows when the
        // balance condition did not match.
        let rows: Vec<FoodBalance> = response
            .json()
            .await
            .map_err(|err| StorageError::unknown(&format!("debit rpc decode: {err}")))?;
        Ok(match rows.into_iter().next() {
            Some(balance) => DebitOutcome::Applied(balance),
            None => DebitOutcome::Insufficient,
        })
    }

    async fn debit_unchecked(
        &self,
        user: &UserId,
        amount: i64,
    ) -> Result<FoodBalance, StorageError> {
        let current = self.balance(user).await?.unwrap_or(FoodBalance {
            user_id: user.clone(),
            current_balance: 0,
            total_spent: 0,
        });
        let updated = FoodBalance {
            user_id: user.clone(),
            current_balance: current.current_balance - amount,
            total_spent: current.total_spent + amount,
        };

        let url = self.endpoint("rest/v1/food_balances")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.service_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&updated)
            .send()
            .await
            .map_err(|err| StorageError::unavailable(&format!("balance write: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_rest_error("food_balances", status, &body));
        }
        Ok(updated)
    }

    async fn insert_transaction(&self, tx: &FoodTransaction) -> Result<(), StorageError> {
        self.insert("food_transactions", tx).await
    }

    async fn insert_cost(&self, cost: &MessageCost) -> Result<(), StorageError> {
        self.insert("message_costs", cost).await
    }

    fn caps(&self) -> StoreCaps {
        StoreCaps { atomic_debit: true }
    }
}

#[async_trait]
impl ObjectStore for RestStore {
    async fn put_public(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let bucket = &self.config.bucket;
        let url = self.endpoint(&format!("storage/v1/object/{bucket}/{path}"))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.service_key)
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|err| StorageError::unavailable(&format!("object upload: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_rest_error("storage/object", status, &body));
        }

        let public = self.endpoint(&format!("storage/v1/object/public/{bucket}/{path}"))?;
        Ok(public.to_string())
    }
}
