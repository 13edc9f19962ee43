// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! `console` table for document scripts, forwarding to `tracing`.

use mlua::{Lua, MultiValue, Result as LuaResult, Table, Value};

fn join_values(lua: &Lua, values: MultiValue) -> LuaResult<String> {
    let mut parts = Vec::new();
    for value in values {
        let part = match value {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::String(s) => s.to_string_lossy().to_string(),
            other => match lua.coerce_string(other.clone())? {
                Some(s) => s.to_string_lossy().to_string(),
                None => format!("{:?}", other),
            },
        };
        parts.push(part);
    }
    Ok(parts.join(" "))
}

/// Builds the `console` table for the document `document`.
///
/// `console.log` and `console.info` log at info level, `console.warn` at
/// warn and `console.error` at error, each tagged with the document.
pub fn create_console_module(lua: &Lua, document: &str) -> LuaResult<Table> {
    let console = lua.create_table()?;

    let doc = document.to_string();
    console.set(
        "log",
        lua.create_function(move |lua, values: MultiValue| {
            tracing::info!(document = %doc, "{}", join_values(lua, values)?);
            Ok(())
        })?,
    )?;

    let doc = document.to_string();
    console.set(
        "info",
        lua.create_function(move |lua, values: MultiValue| {
            tracing::info!(document = %doc, "{}", join_values(lua, values)?);
            Ok(())
        })?,
    )?;

    let doc = document.to_string();
    console.set(
        "warn",
        lua.create_function(move |lua, values: MultiValue| {
            tracing::warn!(document = %doc, "{}", join_values(lua, values)?);
            Ok(())
        })?,
    )?;

    let doc = document.to_string();
    console.set(
        "error",
        lua.create_function(move |lua, values: MultiValue| {
            tracing::error!(document = %doc, "{}", join_values(lua, values)?);
            Ok(())
        })?,
    )?;

    Ok(console)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_functions_accept_any_values() {
        let lua = Lua::new();
        lua.globals()
            .set("console", create_console_module(&lua, "index.tkml").unwrap())
            .unwrap();
        lua.load(r#"console.log("a", 1, true, nil, {}) console.warn("w") console.error() console.info(2.5)"#)
            .exec()
            .unwrap();
    }

    #[test]
    fn test_join_values() {
        let lua = Lua::new();
        let values: MultiValue = lua.load(r#"return "x", 1, false, nil"#).eval().unwrap();
        assert_eq!(join_values(&lua, values).unwrap(), "x 1 false nil");
    }
}
