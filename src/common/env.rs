use std::env;
use std::error::Error;
use std::str::FromStr;
use std::time::Duration;

pub trait FromEnv: Sized {
    fn from_env(env_var: &str) -> anyhow::Result<Self>;

    /// Like [`FromEnv::from_env`], but an unset variable yields `default`.
    /// A set-but-malformed variable is still an error.
    fn from_env_or(env_var: &str, default: Self) -> anyhow::Result<Self> {
        match env::var(env_var) {
            Ok(_) => Self::from_env(env_var),
            Err(env::VarError::NotPresent) => Ok(default),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: FromStr> FromEnv for T
where
    <T as FromStr>::Err: 'static + Error + Send + Sync,
{
    fn from_env(env_var: &str) -> anyhow::Result<Self> {
        let value = env::var(env_var)?;
        T::from_str(value.trim())
            .map_err(|e| anyhow::anyhow!("invalid value for {env_var}: {e}"))
    }
}

pub fn secs_from_env_or(env_var: &str, default_secs: u64) -> anyhow::Result<Duration> {
    let secs = u64::from_env_or(env_var, default_secs)?;
    Ok(Duration::from_secs(secs))
}

pub fn millis_from_env_or(env_var: &str, default_millis: u64) -> anyhow::Result<Duration> {
    let millis = u64::from_env_or(env_var, default_millis)?;
    Ok(Duration::from_millis(millis))
}

pub fn optional_from_env(env_var: &str) -> Option<String> {
    env::var(env_var).ok().filter(|value| !value.trim().is_empty())
}
