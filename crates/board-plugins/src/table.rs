use crate::{BoardDescriptor, FeatureId, PlatformRegistry};
use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Integer written either as a YAML number or as a `"0x…"` string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum HexValue {
    Int(i64),
    Text(String),
}

impl HexValue {
    fn signed(&self) -> anyhow::Result<i64> {
        match self {
            HexValue::Int(v) => Ok(*v),
            HexValue::Text(s) => {
                let t = s.trim();
                let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                    Some(hex) => i64::from_str_radix(hex, 16),
                    None => t.parse::<i64>(),
                };
                parsed.with_context(|| format!("invalid number: {s:?}"))
            }
        }
    }

    fn value(&self) -> anyhow::Result<u64> {
        let v = self.signed()?;
        u64::try_from(v).with_context(|| format!("negative value: {v}"))
    }

    fn id(&self, field: &str) -> anyhow::Result<u16> {
        let v = self.value()?;
        u16::try_from(v).with_context(|| format!("{field} out of range: {v:#x}"))
    }

    /// `-1` and `0` both mean "no feature required".
    fn feature(&self) -> anyhow::Result<Option<FeatureId>> {
        match self.signed()? {
            -1 | 0 => Ok(None),
            v if v > 0 => Ok(Some(FeatureId(v as u64))),
            v => bail!("invalid required_feature: {v}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BoardRow {
    vendor_id: HexValue,
    device_id: HexValue,
    #[serde(default)]
    subvendor_id: Option<HexValue>,
    #[serde(default)]
    subdevice_id: Option<HexValue>,
    #[serde(default)]
    required_feature: Option<HexValue>,
    module: String,
    product_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BoardTable {
    boards: Vec<BoardRow>,
}

impl BoardRow {
    fn into_descriptor(self) -> anyhow::Result<BoardDescriptor> {
        let optional_id = |v: &Option<HexValue>, field: &str| -> anyhow::Result<u16> {
            v.as_ref().map(|v| v.id(field)).transpose().map(|v| v.unwrap_or(0))
        };
        Ok(BoardDescriptor {
            vendor_id: self.vendor_id.id("vendor_id")?,
            device_id: self.device_id.id("device_id")?,
            subvendor_id: optional_id(&self.subvendor_id, "subvendor_id")?,
            subdevice_id: optional_id(&self.subdevice_id, "subdevice_id")?,
            required_feature: match &self.required_feature {
                Some(f) => f.feature()?,
                None => None,
            },
            module: self.module,
            product_name: self.product_name,
        })
    }
}

/// Parse and validate a board table.
pub fn parse_board_table(raw: &str) -> anyhow::Result<Vec<BoardDescriptor>> {
    let table: BoardTable = serde_yaml::from_str(raw).context("parsing board table")?;
    let mut boards = Vec::with_capacity(table.boards.len());
    let mut seen = HashSet::new();
    for (i, row) in table.boards.into_iter().enumerate() {
        let desc = row
            .into_descriptor()
            .with_context(|| format!("board row {i}"))?;
        if desc.module.trim().is_empty() {
            bail!("board row {i}: empty module name");
        }
        let key = (
            desc.vendor_id,
            desc.device_id,
            desc.subvendor_id,
            desc.subdevice_id,
            desc.required_feature,
        );
        if !seen.insert(key) {
            bail!(
                "board row {i}: duplicates an earlier row for {:04x}:{:04x}",
                desc.vendor_id,
                desc.device_id
            );
        }
        boards.push(desc);
    }
    Ok(boards)
}

pub fn load_board_table(path: impl AsRef<Path>) -> anyhow::Result<Vec<BoardDescriptor>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading board table: {}", path.display()))?;
    parse_board_table(&raw).with_context(|| format!("loading board table: {}", path.display()))
}

impl PlatformRegistry {
    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(Self::new(parse_board_table(raw)?))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(load_board_table(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
boards:
  - vendor_id: "0x8086"
    device_id: "0xbcce"
    subvendor_id: "0x8086"
    required_feature: "0xe"
    module: libboard_d5005.so
    product_name: Intel Open FPGA Stack Platform
  - vendor_id: 32902
    device_id: "0xbcce"
    subvendor_id: "0x8086"
    subdevice_id: "0x1770"
    required_feature: 18
    module: libboard_n6000.so
    product_name: Intel Acceleration Development Platform N6000
"#;

    #[test]
    fn test_parse_mixed_number_forms() {
        let boards = parse_board_table(TABLE).unwrap();
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].subdevice_id, 0);
        assert_eq!(boards[0].required_feature, Some(FeatureId(0xe)));
        assert_eq!(boards[1].vendor_id, 0x8086);
        assert_eq!(boards[1].subdevice_id, 0x1770);
        assert_eq!(boards[1].required_feature, Some(FeatureId(0x12)));
    }

    #[test]
    fn test_no_feature_markers() {
        let raw = r#"
boards:
  - { vendor_id: "0x8086", device_id: "0x1", required_feature: -1, module: a.so, product_name: A }
  - { vendor_id: "0x8086", device_id: "0x2", required_feature: 0, module: b.so, product_name: B }
  - { vendor_id: "0x8086", device_id: "0x3", required_feature: "0x0", module: c.so, product_name: C }
  - { vendor_id: "0x8086", device_id: "0x4", required_feature: "-1", module: d.so, product_name: D }
"#;
        let boards = parse_board_table(raw).unwrap();
        assert!(boards.iter().all(|b| b.required_feature.is_none()));

        let bad = r#"
boards:
  - { vendor_id: "0x8086", device_id: "0x1", required_feature: -2, module: a.so, product_name: A }
"#;
        assert!(parse_board_table(bad).is_err());
        let negative_id = r#"
boards:
  - { vendor_id: -1, device_id: "0x1", module: a.so, product_name: A }
"#;
        assert!(parse_board_table(negative_id).is_err());
    }

    #[test]
    fn test_rejects_duplicate_rows() {
        let raw = r#"
boards:
  - { vendor_id: "0x1c2c", device_id: "0x1000", module: a.so, product_name: A }
  - { vendor_id: "0x1c2c", device_id: "0x1000", module: b.so, product_name: B }
"#;
        let err = parse_board_table(raw).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_rejects_out_of_range_and_empty_module() {
        let wide = r#"
boards:
  - { vendor_id: "0x18086", device_id: "0x1", module: a.so, product_name: A }
"#;
        assert!(parse_board_table(wide).is_err());
        let empty = r#"
boards:
  - { vendor_id: "0x8086", device_id: "0x1", module: " ", product_name: A }
"#;
        assert!(parse_board_table(empty).is_err());
    }

    #[test]
    fn test_shipped_table_matches_builtin() {
        let shipped = parse_board_table(include_str!("../../../configs/boards.yaml")).unwrap();
        assert_eq!(shipped, crate::builtin_boards());
    }

    #[test]
    fn test_load_file_into_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("boards.yaml");
        fs::write(&path, TABLE).unwrap();
        let reg = PlatformRegistry::from_yaml_file(&path).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(PlatformRegistry::from_yaml_file(tmp.path().join("missing.yaml")).is_err());
    }
}
