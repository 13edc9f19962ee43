// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! JSON module for document scripts.
//!
//! Provides `json.encode`, `json.decode`, `json.encode_pretty`, and `json.null`.

use mlua::{Lua, LuaSerdeExt, Result as LuaResult, Table, Value};

/// Builds the `json` table bound into every document environment.
///
/// # Example
///
/// ```rust,ignore
/// let json = create_json_module(&lua)?;
/// env.set("json", json)?;
/// ```
pub fn create_json_module(lua: &Lua) -> LuaResult<Table> {
    let json_module = lua.create_table()?;

    let encode = lua.create_function(|_, value: Value| {
        serde_json::to_string(&value)
            .map_err(|err| mlua::Error::external(format!("JSON encode error: {}", err)))
    })?;
    json_module.set("encode", encode)?;

    let encode_pretty = lua.create_function(|_, value: Value| {
        serde_json::to_string_pretty(&value)
            .map_err(|err| mlua::Error::external(format!("JSON encode error: {}", err)))
    })?;
    json_module.set("encode_pretty", encode_pretty)?;

    let decode = lua.create_function(|lua, json_str: String| {
        match serde_json::from_str::<serde_json::Value>(&json_str) {
            Ok(json_value) => lua.to_value(&json_value),
            Err(err) => Err(mlua::Error::external(format!("JSON decode error: {}", err))),
        }
    })?;
    json_module.set("decode", decode)?;

    // Lua has no native null
    json_module.set("null", lua.null())?;

    Ok(json_module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_and_decode() {
        let lua = Lua::new();
        lua.globals().set("json", create_json_module(&lua).unwrap()).unwrap();

        let encoded: String = lua.load(r#"return json.encode({ name = "tkml" })"#).eval().unwrap();
        assert_eq!(encoded, r#"{"name":"tkml"}"#);

        let decoded: String = lua
            .load(r#"local t = json.decode('{"items":[1,2,3],"title":"x"}') return t.title .. #t.items"#)
            .eval()
            .unwrap();
        assert_eq!(decoded, "x3");
    }

    #[test]
    fn test_decode_error_is_raised() {
        let lua = Lua::new();
        lua.globals().set("json", create_json_module(&lua).unwrap()).unwrap();

        let err = lua.load("return json.decode('{not json')").eval::<Value>().unwrap_err();
        assert!(err.to_string().contains("JSON decode error"));
    }
}
