use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::{AnalyticalError, AnalyticalRow, AnalyticalSink, RowError};

/// Analytical sink backed by the BigQuery streaming insert API.
#[derive(Clone)]
pub struct BigQuerySink {
    client: reqwest::Client,
    insert_url: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    rows: &'a [InsertRow<'a>],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRow<'a> {
    insert_id: &'a str,
    json: &'a serde_json::Value,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrors>,
}

#[derive(Deserialize)]
struct InsertErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize, Default)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    message: String,
}

impl BigQuerySink {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<Self, url::ParseError> {
        let insert_url = Url::parse(endpoint)?.join(&format!(
            "bigquery/v2/projects/{project}/datasets/{dataset}/tables/{table}/insertAll"
        ))?;

        Ok(Self { client, insert_url })
    }
}

#[async_trait]
impl AnalyticalSink for BigQuerySink {
    async fn insert_rows(
        &self,
        rows: Vec<AnalyticalRow>,
    ) -> Result<Vec<RowError>, AnalyticalError> {
        let insert_rows: Vec<InsertRow> = rows
            .iter()
            .map(|row| InsertRow {
                insert_id: &row.insert_id,
                json: &row.json,
            })
            .collect();

        let response = self
            .client
            .post(self.insert_url.clone())
            .json(&InsertAllRequest { rows: &insert_rows })
            .send()
            .await
            .map_err(AnalyticalError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticalError::Status { status, body });
        }

        let response: InsertAllResponse = response.json().await.map_err(AnalyticalError::Decode)?;

        // One RowError per failed row, carrying its first reported error.
        Ok(response
            .insert_errors
            .into_iter()
            .map(|row| {
                let first = row.errors.into_iter().next().unwrap_or_default();
                RowError {
                    index: row.index,
                    reason: first.reason,
                    location: first.location,
                    message: first.message,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;

    const INSERT_PATH: &str =
        "/bigquery/v2/projects/sensors/datasets/telemetry/tables/readings/insertAll";

    fn sink(server: &MockServer) -> BigQuerySink {
        BigQuerySink::new(
            reqwest::Client::new(),
            &server.base_url(),
            "sensors",
            "telemetry",
            "readings",
        )
        .unwrap()
    }

    fn row() -> AnalyticalRow {
        AnalyticalRow {
            insert_id: "amber-falcon-river".to_owned(),
            json: json!({"message_id": "amber-falcon-river", "pressure": 1013}),
        }
    }

    #[tokio::test]
    async fn accepted_rows() {
        let server = MockServer::start();
        let insert = server.mock(|when, then| {
            when.method(POST).path(INSERT_PATH).json_body(json!({
                "rows": [{
                    "insertId": "amber-falcon-river",
                    "json": {"message_id": "amber-falcon-river", "pressure": 1013}
                }]
            }));
            then.status(200)
                .json_body(json!({"kind": "bigquery#tableDataInsertAllResponse"}));
        });

        let errors = sink(&server).insert_rows(vec![row()]).await.unwrap();

        insert.assert();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn row_errors_are_returned() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(INSERT_PATH);
            then.status(200).json_body(json!({
                "insertErrors": [{
                    "index": 0,
                    "errors": [{
                        "reason": "invalid",
                        "location": "pressure",
                        "message": "no such field"
                    }]
                }]
            }));
        });

        let errors = sink(&server).insert_rows(vec![row()]).await.unwrap();

        assert_eq!(
            errors,
            vec![RowError {
                index: 0,
                reason: "invalid".to_owned(),
                location: "pressure".to_owned(),
                message: "no such field".to_owned(),
            }]
        );
    }

    #[tokio::test]
    async fn transport_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(INSERT_PATH);
            then.status(404).body("table not found");
        });

        match sink(&server).insert_rows(vec![row()]).await {
            Err(AnalyticalError::Status { status, body }) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "table not found");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(INSERT_PATH);
            then.status(200).body("not json");
        });

        assert!(matches!(
            sink(&server).insert_rows(vec![row()]).await,
            Err(AnalyticalError::Decode(_))
        ));
    }
}
