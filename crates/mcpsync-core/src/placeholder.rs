use crate::env_store::SecretMap;
use crate::models::{EnvValue, ServerConfig};

/// Key a secret for `server_name` is stored under: `GITHUB_TOKEN` for
/// server `github` and base key `TOKEN`, `MY_SERVER_KEY` for `my-server`.
pub fn namespaced_key(server_name: &str, base_key: &str) -> String {
    format!(
        "{}_{}",
        server_name.to_uppercase().replace('-', "_"),
        base_key
    )
}

/// Finds the secret behind `base_key`, namespaced key first, then bare key.
pub fn lookup_secret<'a>(
    secrets: &'a SecretMap,
    server_name: &str,
    base_key: &str,
) -> Option<&'a str> {
    secrets
        .get(&namespaced_key(server_name, base_key))
        .or_else(|| secrets.get(base_key))
        .map(String::as_str)
}

/// Returns a copy of `config` with every resolvable placeholder replaced by
/// its secret. Placeholders without a stored secret stay placeholders.
pub fn resolve_placeholders(
    config: &ServerConfig,
    server_name: &str,
    secrets: &SecretMap,
) -> ServerConfig {
    let mut resolved = config.clone();
    for value in resolved.env.values_mut() {
        let Some(base_key) = value.placeholder_key() else {
            continue;
        };
        if let Some(secret) = lookup_secret(secrets, server_name, base_key) {
            *value = EnvValue::Literal(secret.to_string());
        }
    }
    resolved
}

/// Env keys whose placeholder has no secret behind it.
pub fn unresolved_placeholders(
    config: &ServerConfig,
    server_name: &str,
    secrets: &SecretMap,
) -> Vec<String> {
    config
        .placeholders()
        .filter(|(_, base_key)| lookup_secret(secrets, server_name, base_key).is_none())
        .map(|(key, _)| key.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{namespaced_key, resolve_placeholders, unresolved_placeholders};
    use crate::env_store::SecretMap;
    use crate::models::{EnvValue, ServerConfig};

    fn config_with_token() -> ServerConfig {
        let mut config = ServerConfig::new("npx", vec!["-y".into(), "server-github".into()]);
        config
            .env
            .insert("TOKEN".into(), EnvValue::placeholder("TOKEN"));
        config
            .env
            .insert("NODE_ENV".into(), EnvValue::literal("production"));
        config
    }

    fn secrets(pairs: &[(&str, &str)]) -> SecretMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn namespaced_key_uppercases_and_replaces_dashes() {
        assert_eq!(namespaced_key("github", "TOKEN"), "GITHUB_TOKEN");
        assert_eq!(namespaced_key("sentry-self", "DSN"), "SENTRY_SELF_DSN");
    }

    #[test]
    fn namespaced_key_wins_over_bare_key() {
        let config = config_with_token();
        let store = secrets(&[("GITHUB_TOKEN", "abc123"), ("TOKEN", "bare")]);
        let resolved = resolve_placeholders(&config, "github", &store);
        assert_eq!(resolved.env["TOKEN"], EnvValue::literal("abc123"));
        assert_eq!(resolved.env["NODE_ENV"], EnvValue::literal("production"));
    }

    #[test]
    fn bare_key_is_the_fallback() {
        let config = config_with_token();
        let resolved = resolve_placeholders(&config, "github", &secrets(&[("TOKEN", "bare")]));
        assert_eq!(resolved.env["TOKEN"], EnvValue::literal("bare"));
    }

    #[test]
    fn unresolved_placeholder_is_left_in_place_and_input_untouched() {
        let config = config_with_token();
        let resolved = resolve_placeholders(&config, "github", &SecretMap::new());
        assert_eq!(resolved.env["TOKEN"].render(), "TOKEN.env");
        assert_eq!(config, config_with_token());
        assert_eq!(
            unresolved_placeholders(&config, "github", &SecretMap::new()),
            vec![String::from("TOKEN")]
        );
    }
}
