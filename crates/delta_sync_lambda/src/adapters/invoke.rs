use aws_sdk_lambda::types::InvocationType;
use delta_sync_core::dispatch::BatchInvoker;

use super::bridge::BlockingBridge;

/// Fire-and-forget invocation of the downstream processing function.
#[derive(Clone, Debug)]
pub struct LambdaBatchInvoker {
    client: aws_sdk_lambda::Client,
    function_name: String,
    bridge: BlockingBridge,
}

impl LambdaBatchInvoker {
    pub fn new(
        client: aws_sdk_lambda::Client,
        function_name: impl Into<String>,
        bridge: BlockingBridge,
    ) -> Self {
        Self {
            client,
            function_name: function_name.into(),
            bridge,
        }
    }
}

impl BatchInvoker for LambdaBatchInvoker {
    fn invoke_batch(&self, payload: &[u8]) -> Result<(), String> {
        let request = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::Event)
            .set_payload(Some(payload.to_vec().into()));
        let output = self
            .bridge
            .run(request.send())
            .map_err(|error| format!("failed to invoke lambda: {error}"))?;
        match output.function_error() {
            Some(function_error) => Err(format!(
                "lambda {} rejected payload: {function_error}",
                self.function_name
            )),
            None => Ok(()),
        }
    }
}

/// Enqueues each payload as one message body.
#[derive(Clone, Debug)]
pub struct SqsBatchInvoker {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    bridge: BlockingBridge,
}

impl SqsBatchInvoker {
    pub fn new(
        client: aws_sdk_sqs::Client,
        queue_url: impl Into<String>,
        bridge: BlockingBridge,
    ) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            bridge,
        }
    }
}

impl BatchInvoker for SqsBatchInvoker {
    fn invoke_batch(&self, payload: &[u8]) -> Result<(), String> {
        let body = String::from_utf8(payload.to_vec())
            .map_err(|error| format!("invalid UTF-8 batch payload: {error}"))?;
        let request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body);
        self.bridge
            .run(request.send())
            .map(|_| ())
            .map_err(|error| format!("failed to enqueue batch message: {error}"))
    }
}
