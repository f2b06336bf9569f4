use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{Board, Created};
use crate::model::card::Card;

const BASE: &str = "https://api.trello.com/1";

pub struct TrelloBoard {
    api_key: String,
    token: String,
    client: reqwest::Client,
}

impl TrelloBoard {
    pub fn new(api_key: String, token: String) -> Self {
        Self {
            api_key,
            token,
            client: reqwest::Client::new(),
        }
    }

    fn auth_params(&self) -> [(&str, &str); 2] {
        [("key", &self.api_key), ("token", &self.token)]
    }

    async fn add_label(&self, card_id: &str, color: &str) -> Result<()> {
        self.client
            .post(format!("{BASE}/cards/{card_id}/labels"))
            .query(&self.auth_params())
            .json(&serde_json::json!({ "color": color }))
            .send()
            .await
            .with_context(|| format!("Failed to add {color} label to Trello card"))?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrelloCard {
    id: String,
    name: String,
    desc: Option<String>,
    short_url: Option<String>,
}

impl From<TrelloCard> for Card {
    fn from(card: TrelloCard) -> Self {
        Card {
            id: card.id,
            name: card.name,
            description: card.desc.filter(|d| !d.is_empty()),
            url: card.short_url,
            // Trello has no plain custom field without a Power-Up; match by name.
            external_id: None,
        }
    }
}

#[async_trait]
impl Board for TrelloBoard {
    fn name(&self) -> &str {
        "Trello"
    }

    async fn list_records(&self, list_id: &str) -> Result<Vec<Card>> {
        let cards: Vec<TrelloCard> = self
            .client
            .get(format!("{BASE}/lists/{list_id}/cards"))
            .query(&self.auth_params())
            .query(&[("fields", "id,name,desc,shortUrl")])
            .send()
            .await
            .with_context(|| format!("Trello cards for list {list_id} failed"))?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse Trello cards")?;

        Ok(cards.into_iter().map(Card::from).collect())
    }

    async fn create_record(
        &self,
        list_id: &str,
        name: &str,
        description: &str,
        color: Option<&str>,
    ) -> Result<Created> {
        let body = serde_json::json!({
            "idList": list_id,
            "name": name,
            "desc": description,
            "pos": "bottom",
        });
        let card: TrelloCard = self
            .client
            .post(format!("{BASE}/cards"))
            .query(&self.auth_params())
            .json(&body)
            .send()
            .await
            .context("Failed to create Trello card")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse created Trello card")?;

        let label_error = match color {
            Some(color) => self.add_label(&card.id, color).await.err(),
            None => None,
        };

        Ok(Created {
            card: card.into(),
            label_error,
        })
    }

    async fn add_comment(&self, card: &Card, text: &str) -> Result<()> {
        self.client
            .post(format!("{BASE}/cards/{}/actions/comments", card.id))
            .query(&self.auth_params())
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .with_context(|| format!("Failed to comment on Trello card {}", card.name))?
            .error_for_status()?;
        Ok(())
    }
}
