use delta_sync_lambda::adapters::bridge::BlockingBridge;
use delta_sync_lambda::adapters::invoke::LambdaBatchInvoker;
use delta_sync_lambda::adapters::object_store::{S3ArtifactStore, S3ObjectStore};
use delta_sync_lambda::clients::AwsClients;
use delta_sync_lambda::config::{optional_env, required_env, AUDIT_BUCKET_ENV, FUNCTION_NAME_ENV};
use delta_sync_lambda::handlers::dispatch::{handle_dispatch_event, DispatchSummary};
use delta_sync_lambda::logging::{init_logging, LogFormat, LogSettings};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

/// Adapters built once per execution environment and shared by every
/// invocation it serves.
struct Collaborators {
    store: S3ObjectStore,
    audit_store: S3ArtifactStore,
    invoker: LambdaBatchInvoker,
}

impl Collaborators {
    async fn load() -> Result<Self, Error> {
        let function_name =
            required_env(FUNCTION_NAME_ENV).map_err(|error| Error::from(error.to_string()))?;
        let audit_bucket =
            required_env(AUDIT_BUCKET_ENV).map_err(|error| Error::from(error.to_string()))?;
        let bridge = BlockingBridge::current()
            .ok_or_else(|| Error::from("dispatch handler must run inside the tokio runtime"))?;
        let clients = AwsClients::load().await;

        Ok(Self {
            store: S3ObjectStore::new(clients.s3.clone(), bridge.clone()),
            audit_store: S3ArtifactStore::new(clients.s3.clone(), bridge.clone(), audit_bucket, ""),
            invoker: LambdaBatchInvoker::new(clients.lambda.clone(), function_name, bridge),
        })
    }
}

fn handle_request(
    event: LambdaEvent<Value>,
    collaborators: &Collaborators,
) -> Result<DispatchSummary, Error> {
    handle_dispatch_event(
        event.payload,
        &event.context.request_id,
        &collaborators.store,
        &collaborators.invoker,
        &collaborators.audit_store,
    )
    .map_err(|error| {
        tracing::error!(
            component = "dispatch_lambda",
            event = "failed",
            stage = error.stage().as_str(),
            error = %error
        );
        Error::from(error.to_string())
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging(&LogSettings {
        level: optional_env("DELTA_SYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        format: LogFormat::Json,
    });
    let collaborators = Collaborators::load().await?;
    let collaborators = &collaborators;

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_request(event, collaborators)
    }))
    .await
}
