//! Tile URL templates (`https://host/{z}/{x}/{y}.png`)

use crate::{TileError, TileIndex};

/// A validated tile URL template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
}

impl UrlTemplate {
    /// Parse a template; `{x}`, `{y}` and `{z}` are mandatory, `{s}` is optional.
    pub fn parse(raw: &str) -> Result<Self, TileError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TileError::InvalidTemplate("template is empty".to_string()));
        }

        let missing: Vec<&str> = ["{x}", "{y}", "{z}"]
            .into_iter()
            .filter(|p| !raw.contains(p))
            .collect();
        if !missing.is_empty() {
            return Err(TileError::InvalidTemplate(format!(
                "missing placeholder(s) {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
        })
    }

    /// Substitute the tile address (and subdomain) into the template
    pub fn render(&self, index: &TileIndex, subdomain: &str) -> String {
        self.raw
            .replace("{s}", subdomain)
            .replace("{x}", &index.x.to_string())
            .replace("{y}", &index.y.to_string())
            .replace("{z}", &index.z.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_all_slots() {
        let template =
            UrlTemplate::parse("https://webst0{s}.example.com/appmaptile?style=6&x={x}&y={y}&z={z}")
                .unwrap();
        let url = template.render(&TileIndex { x: 26969, y: 12417, z: 15 }, "2");
        assert_eq!(
            url,
            "https://webst02.example.com/appmaptile?style=6&x=26969&y=12417&z=15"
        );
    }

    #[test]
    fn test_subdomain_is_optional() {
        let template = UrlTemplate::parse("http://tiles/{z}/{x}/{y}.png").unwrap();
        assert_eq!(template.render(&TileIndex { x: 1, y: 2, z: 3 }, "a"), "http://tiles/3/1/2.png");
    }

    #[test]
    fn test_missing_placeholder_rejected() {
        let err = UrlTemplate::parse("http://tiles/{z}/{x}.png").unwrap_err();
        assert!(matches!(err, TileError::InvalidTemplate(msg) if msg.contains("{y}")));
        assert!(UrlTemplate::parse("   ").is_err());
    }
}
