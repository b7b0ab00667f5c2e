//! Global symbol paths: dotted segments with optional indexed selectors,
//! e.g. `world.units.all[3]` or `plotinfo.tasks[0][2]`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolPath {
    pub segments: Vec<Segment>,
}

impl SymbolPath {
    pub fn parse(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Err("empty symbol path".to_string());
        }

        let mut segments = Vec::new();
        for part in text.split('.') {
            let part = part.trim();
            let (name, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if name.is_empty() {
                return Err(format!("empty segment in '{}'", text));
            }

            let mut indices = Vec::new();
            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| format!("unclosed index in '{}'", text))?;
                if !rest.starts_with('[') {
                    return Err(format!("unexpected '{}' in '{}'", rest, text));
                }
                let index = rest[1..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| format!("invalid index in '{}': {}", text, e))?;
                indices.push(index);
                rest = &rest[close + 1..];
            }

            segments.push(Segment {
                name: name.to_string(),
                indices,
            });
        }

        Ok(Self { segments })
    }

    /// Dotted name of the first `count` segments, ignoring indices.
    pub fn prefix_name(&self, count: usize) -> String {
        self.segments[..count]
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Whether the first `count` segments carry no index, except possibly the last.
    pub fn prefix_is_plain(&self, count: usize) -> bool {
        self.segments[..count.saturating_sub(1)]
            .iter()
            .all(|s| s.indices.is_empty())
    }
}

impl fmt::Display for SymbolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&segment.name)?;
            for index in &segment.indices {
                write!(f, "[{}]", index)?;
            }
        }
        Ok(())
    }
}
