//! JSON text as older tournament tooling wrote it: `", "` and `": "`
//! separators, keys in sorted order and non-ASCII escaped as `\uXXXX`.
//!
//! Key order comes from the maps themselves (`BTreeMap`, and serde_json's
//! default `Map`).

use std::io;

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

pub fn to_json<T>(value: &T) -> serde_json::Result<String>
where
    T: ?Sized + Serialize,
{
    let mut out = Vec::new();
    value.serialize(&mut Serializer::with_formatter(&mut out, SpacedFormatter))?;
    // Every non-ASCII character was escaped above.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_spaced_separators() {
        let props = BTreeMap::from([
            ("robocode.battle.numRounds".to_string(), json!(10)),
            ("robocode.battle.selectedRobots".to_string(), json!("a.A,b.B")),
        ]);

        assert_eq!(
            to_json(&props).unwrap(),
            r#"{"robocode.battle.numRounds": 10, "robocode.battle.selectedRobots": "a.A,b.B"}"#
        );
    }

    #[test]
    fn test_nested_values() {
        let value = json!({"b": [1, 2, {"c": null}], "a": true});
        assert_eq!(to_json(&value).unwrap(), r#"{"a": true, "b": [1, 2, {"c": null}]}"#);
        assert_eq!(to_json(&json!({})).unwrap(), "{}");
    }

    #[test]
    fn test_non_ascii_escaped() {
        assert_eq!(to_json(&json!("Zoë \"Z\"")).unwrap(), r#""Zo\u00eb \"Z\"""#);
        assert_eq!(to_json(&json!("🤖")).unwrap(), r#""\ud83e\udd16""#);
    }

    #[test]
    fn test_reads_back() {
        let value = json!({"_Name": "sample.Fire", "_Place": 1, "Survival": "450"});
        let text = to_json(&value).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap(), value);
    }
}
