//! One-shot configuration assembly
//!
//! Validates the user + system configuration (collecting every problem
//! before failing) and expands the routing rules into the immutable
//! routing table. Runs at startup and on each requested reload; the
//! caller serializes concurrent reloads.

use std::collections::{BTreeMap, HashMap};

use plexus_core::Category;
use plexus_config::{ProviderSpec, ProviderTypeTemplate, SystemConfig, UserConfig};

use crate::error::{ConfigError, ConfigIssue};
use crate::rules::parse_rule;
use crate::table::{
    CompatConfig, HttpCallConfig, LayerConfigs, PipelineConfig, ProtocolConfig, RoutingTable,
    TransformerConfig,
};
use crate::tags::{CompatTag, ProtocolKind, TransformerKind};

/// Default max-tokens clamp when neither model nor provider sets one
const FALLBACK_MAX_TOKENS: u32 = 4096;

/// Assemble the routing table from validated configuration
///
/// Fails with a [`ConfigError`] listing *every* problem found — rule
/// syntax, dangling provider or model references, missing keys, and
/// unresolved tags — rather than stopping at the first.
pub fn assemble(user: &UserConfig, system: &SystemConfig) -> Result<RoutingTable, ConfigError> {
    let mut issues = Vec::new();

    validate_providers(user, system, &mut issues);
    let rules = validate_rules(user, &mut issues);

    if !issues.is_empty() {
        return Err(ConfigError { issues });
    }

    Ok(expand(user, system, &rules))
}

/// Provider-level checks: keys present, tags resolvable
fn validate_providers(user: &UserConfig, system: &SystemConfig, issues: &mut Vec<ConfigIssue>) {
    for provider in &user.providers {
        if provider.api_key.is_empty() {
            issues.push(ConfigIssue::NoApiKeys {
                provider: provider.name.clone(),
            });
        }

        if let Some(selector) = &provider.server_compatibility
            && system.template(&selector.tag).is_none()
        {
            issues.push(ConfigIssue::UnresolvedTag {
                provider: provider.name.clone(),
                kind: "server_compatibility",
                tag: selector.tag.clone(),
            });
        }

        // Protocol and transformer checks still run when the tag is
        // unresolved; the template only supplies their defaults
        let template = resolve_template(provider, system);

        let protocol = provider
            .protocol
            .as_deref()
            .unwrap_or(&template.protocol);
        if ProtocolKind::from_tag(protocol).is_none() {
            issues.push(ConfigIssue::UnknownProtocol {
                provider: provider.name.clone(),
                protocol: protocol.to_owned(),
            });
        }

        let transformer = provider
            .transformer
            .as_deref()
            .unwrap_or(&template.transformer);
        if TransformerKind::from_tag(transformer).is_none() {
            issues.push(ConfigIssue::UnknownTransformer {
                provider: provider.name.clone(),
                transformer: transformer.to_owned(),
            });
        }
    }
}

/// Parse and cross-check each category's rule; returns the parsed targets
fn validate_rules(
    user: &UserConfig,
    issues: &mut Vec<ConfigIssue>,
) -> Vec<(Category, Vec<crate::rules::RouteTarget>)> {
    let mut rules = Vec::new();

    for category in Category::ALL {
        let Some(rule) = user.router.rule(category) else {
            continue;
        };

        if category == Category::Default && rule.trim().is_empty() {
            issues.push(ConfigIssue::EmptyDefault);
            continue;
        }

        let targets = match parse_rule(rule) {
            Ok(targets) => targets,
            Err(detail) => {
                issues.push(ConfigIssue::RuleSyntax { category, detail });
                continue;
            }
        };

        for target in &targets {
            match user.provider(&target.provider) {
                None => issues.push(ConfigIssue::UnknownProvider {
                    category,
                    provider: target.provider.clone(),
                }),
                Some(provider) => {
                    if !provider.models.iter().any(|m| m.name() == target.model) {
                        issues.push(ConfigIssue::UnknownModel {
                            category,
                            provider: target.provider.clone(),
                            model: target.model.clone(),
                        });
                    }
                }
            }
        }

        rules.push((category, targets));
    }

    rules
}

/// Expand validated rules into pipeline configs and the category lists
///
/// One pipeline per (provider, model, key index); a triple reached
/// through several categories is emitted once and referenced by each.
/// Within a category, targets order by provider weight descending, then
/// rule order (the sort is stable).
fn expand(
    user: &UserConfig,
    system: &SystemConfig,
    rules: &[(Category, Vec<crate::rules::RouteTarget>)],
) -> RoutingTable {
    let mut categories: BTreeMap<Category, Vec<String>> = BTreeMap::new();
    let mut pipelines: Vec<PipelineConfig> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for (category, targets) in rules {
        let mut ordered: Vec<_> = targets.iter().collect();
        ordered.sort_by_key(|t| {
            std::cmp::Reverse(user.provider(&t.provider).map_or(0, |p| p.weight))
        });

        let ids = categories.entry(*category).or_default();

        for target in ordered {
            let provider = user
                .provider(&target.provider)
                .expect("providers validated before expansion");

            for key_index in 0..provider.api_key.len() {
                let id = format!("{}-{}-key{key_index}", provider.name, target.model);

                if let Some(&existing) = by_id.get(&id) {
                    if !pipelines[existing].categories.contains(category) {
                        pipelines[existing].categories.push(*category);
                    }
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                    continue;
                }

                let config =
                    build_pipeline(provider, &target.model, key_index, *category, system, &id);
                by_id.insert(id.clone(), pipelines.len());
                pipelines.push(config);
                ids.push(id);
            }
        }
    }

    RoutingTable::new(categories, pipelines)
}

/// Template for a provider's compat tag; `generic` when unspecified
fn resolve_template(provider: &ProviderSpec, system: &SystemConfig) -> ProviderTypeTemplate {
    provider
        .server_compatibility
        .as_ref()
        .and_then(|selector| system.template(&selector.tag))
        .or_else(|| system.template("generic"))
        .cloned()
        .unwrap_or_default()
}

fn build_pipeline(
    provider: &ProviderSpec,
    model: &str,
    key_index: usize,
    category: Category,
    system: &SystemConfig,
    id: &str,
) -> PipelineConfig {
    let template = resolve_template(provider, system);

    let compat_tag_name = provider
        .server_compatibility
        .as_ref()
        .map_or("generic", |selector| selector.tag.as_str());
    let compat_module = template
        .server_compatibility
        .as_deref()
        .unwrap_or(compat_tag_name);
    let compat = CompatTag::from_name(compat_module);
    if compat == CompatTag::Generic && compat_module != "generic" {
        tracing::warn!(
            provider = %provider.name,
            module = %compat_module,
            "unknown compat module, falling back to generic"
        );
    }

    let protocol = provider
        .protocol
        .as_deref()
        .unwrap_or(&template.protocol);
    let protocol = ProtocolKind::from_tag(protocol).expect("protocols validated before expansion");

    let transformer = provider
        .transformer
        .as_deref()
        .unwrap_or(&template.transformer);
    let transformer =
        TransformerKind::from_tag(transformer).expect("transformers validated before expansion");

    let model_max_tokens = provider
        .models
        .iter()
        .find(|m| m.name() == model)
        .and_then(plexus_config::ModelEntry::max_tokens);
    let max_tokens = model_max_tokens
        .or(provider.max_tokens)
        .unwrap_or(FALLBACK_MAX_TOKENS);

    let api_key = provider
        .api_key
        .get(key_index)
        .expect("key index within validated key count")
        .clone();

    PipelineConfig {
        id: id.to_owned(),
        provider: provider.name.clone(),
        target_model: model.to_owned(),
        endpoint: provider.api_base_url.clone(),
        key_index,
        api_key,
        max_tokens,
        timeout_ms: template.timeout_ms,
        max_retries: template.max_retries,
        weight: provider.weight,
        max_concurrent: provider.max_concurrent,
        categories: vec![category],
        layers: LayerConfigs {
            transformer: TransformerConfig {
                provider: provider.name.clone(),
                target_model: model.to_owned(),
                kind: transformer,
            },
            protocol: ProtocolConfig {
                provider: provider.name.clone(),
                target_model: model.to_owned(),
                endpoint: provider.api_base_url.clone(),
                kind: protocol,
                timeout_ms: template.timeout_ms,
                max_retries: template.max_retries,
            },
            compat: CompatConfig {
                tag: compat,
                endpoint_suffix: template.endpoint.clone(),
                max_tokens,
                options: provider
                    .server_compatibility
                    .as_ref()
                    .map_or(serde_json::Value::Null, |selector| {
                        selector.options.clone()
                    }),
            },
            server: HttpCallConfig {
                endpoint: provider.api_base_url.clone(),
                timeout_ms: template.timeout_ms,
                max_retries: template.max_retries,
                max_tokens,
            },
        },
    }
}
