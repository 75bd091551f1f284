use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Read-only lookup of flat string properties.
///
/// Implemented by the application config and by module runtimes so that the
/// same typed accessors work against either.
pub trait PropertySource: Send + Sync {
    fn property(&self, key: &str) -> Option<String>;
}

impl PropertySource for BTreeMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl PropertySource for HashMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Parse a property, falling back to `default` when it is missing or does not parse.
pub fn parse_property<S, T>(source: &S, key: &str, default: T) -> T
where
    S: PropertySource + ?Sized,
    T: FromStr,
{
    let Some(raw) = source.property(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable property, using default");
            default
        }
    }
}

/// Parse `key=value` as given to `-D` on the command line.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty property key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_property_uses_default() {
        let p = props(&[]);
        assert_eq!(parse_property(&p, "port", 8080u16), 8080);
    }

    #[test]
    fn present_property_is_parsed() {
        let p = props(&[("port", " 9191 ")]);
        assert_eq!(parse_property(&p, "port", 8080u16), 9191);
    }

    #[test]
    fn unparsable_property_uses_default() {
        let p = props(&[("port", "eighty")]);
        assert_eq!(parse_property(&p, "port", 8080u16), 8080);

        let p = props(&[("port", "70000")]);
        assert_eq!(parse_property(&p, "port", 8080u16), 8080);
    }

    #[test]
    fn key_value_parsing() {
        assert_eq!(
            parse_key_value("jersey.bundle.location=file:///tmp/app.war").unwrap(),
            (
                "jersey.bundle.location".to_string(),
                "file:///tmp/app.war".to_string()
            )
        );
        assert_eq!(
            parse_key_value("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=value").is_err());
    }
}
