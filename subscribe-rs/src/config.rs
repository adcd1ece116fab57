use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    pub hub: String,
    pub subscription_module: String,
    #[serde(default = "default_decimals")]
    pub token_decimals: u32,
}

fn default_decimals() -> u32 {
    18
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub rpc_url: String,
    pub hub: Address,
    pub subscription_module: Address,
    pub token_decimals: u32,
}

pub fn load_deployment(path: &Path, rpc_override: Option<String>) -> Result<Deployment> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    let raw: DeploymentRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;
    resolve(raw, rpc_override)
}

fn resolve(raw: DeploymentRaw, rpc_override: Option<String>) -> Result<Deployment> {
    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.clone() {
        env::var(&env_var).unwrap_or(raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    let hub = parse_addr(&raw.hub).context("invalid hub address")?;
    let subscription_module =
        parse_addr(&raw.subscription_module).context("invalid subscriptionModule address")?;

    Ok(Deployment {
        chain_id: raw.chain_id,
        rpc_url,
        hub,
        subscription_module,
        token_decimals: raw.token_decimals,
    })
}

pub fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> DeploymentRaw {
        serde_json::from_value(serde_json::json!({
            "chainId": 100,
            "rpc": "https://rpc.gnosischain.com/",
            "hub": "0xc12C1E50ABB450d6205Ea2C3Fa861b3B834d13e8",
            "subscriptionModule": "0xD5dC464dD561782615D7495d1d7CEd301083c750"
        }))
        .unwrap()
    }

    #[test]
    fn rpc_override_wins() {
        let dep = resolve(raw(), Some("http://localhost:8545".into())).unwrap();
        assert_eq!(dep.rpc_url, "http://localhost:8545");
        assert_eq!(dep.chain_id, 100);
        assert_eq!(dep.token_decimals, 18);
    }

    #[test]
    fn unset_env_var_falls_back_to_artifact_rpc() {
        let mut raw = raw();
        raw.rpc_env_var = Some("CIRCLES_TEST_RPC_THAT_IS_NOT_SET".into());
        let dep = resolve(raw, None).unwrap();
        assert_eq!(dep.rpc_url, "https://rpc.gnosischain.com/");
    }

    #[test]
    fn bad_address_is_rejected() {
        let mut raw = raw();
        raw.hub = "0x1234".into();
        assert!(resolve(raw, None).is_err());
    }
}
