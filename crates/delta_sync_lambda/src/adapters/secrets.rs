use crate::config::SecretSource;

use super::bridge::BlockingBridge;

/// Reads secret strings from AWS Secrets Manager.
#[derive(Clone, Debug)]
pub struct SecretsManagerSource {
    client: aws_sdk_secretsmanager::Client,
    bridge: BlockingBridge,
}

impl SecretsManagerSource {
    pub fn new(client: aws_sdk_secretsmanager::Client, bridge: BlockingBridge) -> Self {
        Self { client, bridge }
    }
}

impl SecretSource for SecretsManagerSource {
    fn secret_string(&self, name: &str) -> Result<String, String> {
        let request = self.client.get_secret_value().secret_id(name);
        let output = self
            .bridge
            .run(request.send())
            .map_err(|error| format!("failed to read secret value: {error}"))?;
        output
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| "secret has no string value".to_string())
    }
}
