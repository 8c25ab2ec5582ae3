//! Declarative ffmpeg filter graphs
//!
//! Filters are built as values and compiled to the `-filter_complex` string
//! in one place, so escaping lives here and nowhere else. Option values are
//! escaped twice: once for the filter's own option parser (`\ ' :`) and once
//! for the graph parser (`\ ' [ ] , ;`). Nothing is quoted.

use std::fmt::{self, Write as _};

/// One filter with ordered `key=value` options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    name: String,
    options: Vec<(String, String)>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn opt(mut self, key: &str, value: impl ToString) -> Self {
        self.options.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the first option named `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (i, (key, value)) in self.options.iter().enumerate() {
            f.write_char(if i == 0 { '=' } else { ':' })?;
            write!(f, "{key}={}", escape_graph(&escape_option(value)))?;
        }
        Ok(())
    }
}

/// `[in...]filter,filter[out...]`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterChain {
    inputs: Vec<String>,
    filters: Vec<Filter>,
    outputs: Vec<String>,
}

impl FilterChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain reading the given pads (e.g. `0:v`, `a1`)
    #[must_use]
    pub fn from_pads<I, S>(pads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: pads.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn then(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn output(mut self, pad: impl Into<String>) -> Self {
        self.outputs.push(pad.into());
        self
    }

    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pad in &self.inputs {
            write!(f, "[{pad}]")?;
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write!(f, "{filter}")?;
        }
        for pad in &self.outputs {
            write!(f, "[{pad}]")?;
        }
        Ok(())
    }
}

/// Full graph: chains joined by `;`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterGraph {
    chains: Vec<FilterChain>,
}

impl FilterGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chain: FilterChain) {
        self.chains.push(chain);
    }

    #[must_use]
    pub fn chains(&self) -> &[FilterChain] {
        &self.chains
    }

    /// All filters across all chains, in order
    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.chains.iter().flat_map(|c| c.filters.iter())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.iter().all(|c| c.filters.is_empty())
    }

    /// Compile to the `-filter_complex` argument
    #[must_use]
    pub fn compile(&self) -> String {
        self.chains
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn escape_with(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// First level: the filter's option parser
#[must_use]
pub fn escape_option(value: &str) -> String {
    escape_with(value, &['\\', '\'', ':'])
}

/// Second level: the filtergraph parser
#[must_use]
pub fn escape_graph(value: &str) -> String {
    escape_with(value, &['\\', '\'', '[', ']', ',', ';'])
}

/// Seconds formatted for ffmpeg options, trailing zeros trimmed
#[must_use]
pub fn secs(value: f64) -> String {
    let s = format!("{value:.6}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_display() {
        let f = Filter::new("scale").opt("w", 1080).opt("h", 1920);
        assert_eq!(f.to_string(), "scale=w=1080:h=1920");
        assert_eq!(Filter::new("setsar").opt("r", 1).to_string(), "setsar=r=1");
        assert_eq!(Filter::new("null").to_string(), "null");
    }

    #[test]
    fn test_text_escaping_both_levels() {
        let f = Filter::new("drawtext").opt("text", "it's 50% off: today, only");
        // ' -> \' then \\\'; : -> \: then \\:; , -> \,
        assert_eq!(
            f.to_string(),
            r"drawtext=text=it\\\'s 50% off\\: today\, only"
        );
    }

    #[test]
    fn test_expression_commas_escaped() {
        let f = Filter::new("drawtext").opt("enable", "between(t,1,2)");
        assert_eq!(f.to_string(), r"drawtext=enable=between(t\,1\,2)");
    }

    #[test]
    fn test_chain_and_graph() {
        let mut graph = FilterGraph::new();
        graph.push(
            FilterChain::from_pads(["0:v"])
                .then(Filter::new("fps").opt("fps", 30))
                .then(Filter::new("format").opt("pix_fmts", "yuv420p"))
                .output("v"),
        );
        graph.push(FilterChain::from_pads(["1:a"]).then(Filter::new("anull")).output("a"));
        assert_eq!(
            graph.compile(),
            "[0:v]fps=fps=30,format=pix_fmts=yuv420p[v];[1:a]anull[a]"
        );
        assert_eq!(graph.filters().count(), 3);
    }

    #[test]
    fn test_secs_formatting() {
        assert_eq!(secs(3.0), "3");
        assert_eq!(secs(7.2), "7.2");
        assert_eq!(secs(0.033333333), "0.033333");
        assert_eq!(secs(0.0), "0");
    }
}
