use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use tandem_contracts::{ProcedureKind, RequestEnvelope, ResponseEnvelope};

use crate::ClientError;
use crate::session::SessionSource;

#[derive(Debug, Clone)]
pub(crate) struct OutboundCall {
    pub name: String,
    pub input: Option<Value>,
}

/// One physical HTTP request per [`Transport::send`], single or batched.
pub(crate) struct Transport {
    http: reqwest::Client,
    endpoint: Url,
    session: Arc<dyn SessionSource>,
}

impl Transport {
    pub(crate) fn new(
        endpoint: Url,
        session: Arc<dyn SessionSource>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Transport {
                message: format!("failed to initialize http client: {}", err),
            })?;

        Ok(Self {
            http,
            endpoint,
            session,
        })
    }

    pub(crate) fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn access_token(&self) -> Option<String> {
        self.session.access_token()
    }

    fn call_url(&self, calls: &[OutboundCall], kind: ProcedureKind) -> Result<Url, ClientError> {
        let batch = calls.len() > 1;
        let names = calls
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self.endpoint.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), names);
        url.set_path(&path);

        if batch {
            url.query_pairs_mut().append_pair("batch", "1");
        }

        if kind == ProcedureKind::Query {
            let input = if batch {
                calls.iter().any(|c| c.input.is_some()).then(|| {
                    Value::Array(
                        calls
                            .iter()
                            .map(|c| c.input.clone().unwrap_or(Value::Null))
                            .collect(),
                    )
                })
            } else {
                calls.first().and_then(|c| c.input.clone())
            };

            if let Some(input) = input {
                let encoded = serde_json::to_string(&input).map_err(|err| ClientError::Decode {
                    message: format!("failed to encode input: {}", err),
                })?;
                url.query_pairs_mut().append_pair("input", &encoded);
            }
        }

        Ok(url)
    }

    pub(crate) async fn send(
        &self,
        kind: ProcedureKind,
        calls: &[OutboundCall],
    ) -> Vec<Result<Value, ClientError>> {
        match self.send_inner(kind, calls).await {
            Ok(results) => results,
            Err(err) => vec![Err(err); calls.len()],
        }
    }

    async fn send_inner(
        &self,
        kind: ProcedureKind,
        calls: &[OutboundCall],
    ) -> Result<Vec<Result<Value, ClientError>>, ClientError> {
        let batch = calls.len() > 1;
        let url = self.call_url(calls, kind)?;

        let mut request = match kind {
            ProcedureKind::Query => self.http.get(url),
            ProcedureKind::Mutation => {
                let envelopes = calls
                    .iter()
                    .map(|c| RequestEnvelope {
                        input: c.input.clone(),
                    })
                    .collect::<Vec<_>>();
                if batch {
                    self.http.post(url).json(&envelopes)
                } else {
                    self.http.post(url).json(&envelopes[0])
                }
            }
        };

        if let Some(token) = self.access_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| ClientError::Transport {
            message: if err.is_timeout() {
                "request timed out".to_string()
            } else {
                err.to_string()
            },
        })?;

        let status = response.status();
        tracing::debug!(
            batch_size = calls.len(),
            kind = kind.as_str(),
            status = status.as_u16(),
            "rpc response received"
        );

        let body = response
            .json::<Value>()
            .await
            .map_err(|err| ClientError::Decode {
                message: format!("status {} with non-JSON body: {}", status, err),
            })?;

        decode_envelopes(body, calls.len(), batch)
    }
}

fn decode_envelopes(
    body: Value,
    expected: usize,
    batch: bool,
) -> Result<Vec<Result<Value, ClientError>>, ClientError> {
    let decode_err = |err: serde_json::Error| ClientError::Decode {
        message: err.to_string(),
    };

    if batch && body.is_array() {
        let envelopes =
            serde_json::from_value::<Vec<ResponseEnvelope>>(body).map_err(decode_err)?;
        if envelopes.len() != expected {
            return Err(ClientError::Decode {
                message: format!(
                    "batch response has {} entries for {} calls",
                    envelopes.len(),
                    expected
                ),
            });
        }
        return Ok(envelopes.into_iter().map(into_call_result).collect());
    }

    // A request-level failure answers a batch with one envelope.
    let envelope = serde_json::from_value::<ResponseEnvelope>(body).map_err(decode_err)?;
    if batch && !envelope.is_error() {
        return Err(ClientError::Decode {
            message: "batch response was not an array".to_string(),
        });
    }
    Ok(vec![into_call_result(envelope); expected])
}

fn into_call_result(envelope: ResponseEnvelope) -> Result<Value, ClientError> {
    envelope.into_result().map_err(|body| ClientError::Rpc {
        code: body.code,
        message: body.message,
    })
}
