//! Routing-rule parsing
//!
//! Rules arrive as `"provider,model[;provider,model]*"` strings in the
//! user config. They are parsed exactly once, at assembly; request-time
//! code only ever sees structured [`RouteTarget`]s.

/// One (provider, model) pair from a routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub provider: String,
    pub model: String,
}

/// Parse a routing-rule string into its targets
///
/// Every `;`-separated segment must be `provider,model` with both sides
/// non-empty. Model names may themselves contain commas; only the first
/// comma separates provider from model.
pub fn parse_rule(rule: &str) -> Result<Vec<RouteTarget>, String> {
    if rule.trim().is_empty() {
        return Err("rule is empty".to_owned());
    }

    let mut targets = Vec::new();

    for segment in rule.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(format!("empty segment in rule `{rule}`"));
        }

        let Some((provider, model)) = segment.split_once(',') else {
            return Err(format!("segment `{segment}` is not `provider,model`"));
        };

        let provider = provider.trim();
        let model = model.trim();
        if provider.is_empty() || model.is_empty() {
            return Err(format!("segment `{segment}` has an empty provider or model"));
        }

        targets.push(RouteTarget {
            provider: provider.to_owned(),
            model: model.to_owned(),
        });
    }

    Ok(targets)
}
