use alloy::primitives::Address;
use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const LOCAL_CHAIN_ID: u64 = 31_337;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Sepolia,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Sepolia => "sepolia",
            DeploymentEnv::Local => "local",
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            DeploymentEnv::Sepolia => SEPOLIA_CHAIN_ID,
            DeploymentEnv::Local => LOCAL_CHAIN_ID,
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Sepolia => "Sepolia",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub recorded_at: String,
    pub dice_game: String,
    pub liquidity_pool: String,
    pub chain_id: u64,
    pub network_url: String,
    #[serde(default)]
    pub deployment_block: Option<u64>,
}

impl DeploymentRecord {
    pub fn new(
        env: DeploymentEnv,
        dice_game: Address,
        liquidity_pool: Address,
        network_url: impl Into<String>,
    ) -> Self {
        Self {
            recorded_at: Utc::now().to_rfc3339(),
            dice_game: dice_game.to_checksum(None),
            liquidity_pool: liquidity_pool.to_checksum(None),
            chain_id: env.chain_id(),
            network_url: network_url.into(),
            deployment_block: None,
        }
    }

    pub fn dice_game_address(&self) -> Result<Address> {
        parse_address(&self.dice_game)
            .with_context(|| format!("invalid dice game address {}", self.dice_game))
    }

    pub fn liquidity_pool_address(&self) -> Result<Address> {
        parse_address(&self.liquidity_pool).with_context(|| {
            format!("invalid liquidity pool address {}", self.liquidity_pool)
        })
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::at(Path::new(DEPLOYMENTS_ROOT), env)
    }

    /// Opens the store for `env` under an arbitrary root instead of `.deployments`.
    pub fn at(root: &Path, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root, env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: DeploymentRecord) -> Result<()> {
        write_record(&self.path, &record)
    }
}

pub fn ensure_structure() -> Result<()> {
    for env in [DeploymentEnv::Sepolia, DeploymentEnv::Local] {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

pub fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw.trim()).map_err(|e| anyhow!("unable to parse address {raw}: {e}"))
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    if !root.exists() {
        fs::create_dir_all(root).with_context(|| {
            format!("Failed to create deployments root {}", root.display())
        })?;
    }

    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create {} directory", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"").with_context(|| {
            format!("Failed to initialize deployment record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}
