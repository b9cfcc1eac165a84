/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;

use anyhow::{Context, anyhow};
use humanize_rs::bytes::Bytes;
use yaml_rust::Yaml;

use super::AsyncJobPoolConfig;

fn normalize_key(raw: &str) -> String {
    raw.to_lowercase().replace('-', "_")
}

fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(s) => Ok(usize::from_str(s)?),
        Yaml::Integer(i) => Ok(usize::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'usize' should be 'string' or 'integer'"
        )),
    }
}

fn as_humanize_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(value) => {
            let v = value.parse::<Bytes>()?;
            Ok(v.size())
        }
        Yaml::Integer(value) => Ok(usize::try_from(*value)?),
        _ => Err(anyhow!(
            "yaml value type for humanize usize should be 'string' or 'integer'"
        )),
    }
}

impl AsyncJobPoolConfig {
    pub fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        match v {
            Yaml::Hash(map) => {
                let mut config = AsyncJobPoolConfig::default();
                for (k, v) in map.iter() {
                    let Yaml::String(k) = k else {
                        return Err(anyhow!("key in hash should be string"));
                    };
                    match normalize_key(k).as_str() {
                        "max_size" => {
                            let size = as_usize(v)
                                .context(format!("invalid usize value for key {k}"))?;
                            config.set_max_size(size);
                        }
                        "init_size" => {
                            let size = as_usize(v)
                                .context(format!("invalid usize value for key {k}"))?;
                            config.set_init_size(size);
                        }
                        "stack_size" => {
                            let size = as_humanize_usize(v)
                                .context(format!("invalid humanize usize value for key {k}"))?;
                            config.set_stack_size(size);
                        }
                        _ => return Err(anyhow!("invalid key {k}")),
                    }
                }
                config.check().context("invalid async job pool config")?;
                Ok(config)
            }
            Yaml::Integer(_) | Yaml::String(_) => {
                // a bare value sets both max size and init size
                let size = as_usize(v)?;
                Ok(AsyncJobPoolConfig::with_size(size, size))
            }
            _ => Err(anyhow!(
                "yaml value type for 'async job pool config' should be 'map' or 'usize'"
            )),
        }
    }
}
