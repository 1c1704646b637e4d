//! Reader for the block-structured network definition format.
//!
//! The reader only tokenizes; resolving names and checking rate-law shapes is
//! the job of the network builder.
//!
//! ```text
//! begin parameters
//!     1 k1 1.0
//! end parameters
//! begin species
//!     1 A  100
//!     2 $B k1
//! end species
//! begin reactions
//!     1 1,1 2 0.5*k1
//! end reactions
//! ```

use crate::error::NetworkError;
use std::str::FromStr;

/// Reference to a species, by index or by name.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeciesRef {
    Index(usize),
    Name(String),
}

impl SpeciesRef {
    fn parse(token: &str) -> Self {
        match token.parse() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(token.to_string()),
        }
    }
}

/// Initial value of a species or parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDef {
    Absent,
    Number(f64),
    /// `factor*name`, where `name` is a parameter.
    Scaled { factor: f64, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementDef {
    pub line: usize,
    pub index: Option<usize>,
    pub name: String,
    pub fixed: bool,
    pub value: ValueDef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupDef {
    pub line: usize,
    pub index: Option<usize>,
    pub name: String,
    pub entries: Vec<(SpeciesRef, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub line: usize,
    pub index: Option<usize>,
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionDef {
    pub line: usize,
    pub index: usize,
    pub reactants: Vec<SpeciesRef>,
    pub products: Vec<SpeciesRef>,
    pub stat_factor: f64,
    /// Explicit rate law keyword (`Ele`, `Sat`, `MM`, `Hill`), if any.
    pub keyword: Option<String>,
    pub params: Vec<String>,
}

/// Unresolved contents of a definition file (or of an expansion payload).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkDef {
    pub parameters: Vec<ElementDef>,
    pub species: Vec<ElementDef>,
    pub groups: Vec<GroupDef>,
    pub functions: Vec<FunctionDef>,
    pub reactions: Vec<ReactionDef>,
}

impl NetworkDef {
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
            && self.species.is_empty()
            && self.groups.is_empty()
            && self.functions.is_empty()
            && self.reactions.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Block {
    Parameters,
    Species,
    Groups,
    Functions,
    Reactions,
}

fn block_of(name: &str) -> Option<Block> {
    match name {
        "parameters" => Some(Block::Parameters),
        "species" => Some(Block::Species),
        "groups" | "observables" => Some(Block::Groups),
        "functions" => Some(Block::Functions),
        "reactions" => Some(Block::Reactions),
        _ => None,
    }
}

impl FromStr for NetworkDef {
    type Err = NetworkError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut def = NetworkDef::default();
        // Unknown blocks are skipped; `None` with a name means we are inside one.
        let mut current: Option<(String, Option<Block>)> = None;

        for (i_line, raw) in text.lines().enumerate() {
            let line = i_line + 1;
            let content = raw.split('#').next().unwrap_or("");
            let tokens: Vec<&str> = content.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }

            match (&current, tokens.as_slice()) {
                (None, ["begin", name]) => {
                    current = Some((name.to_string(), block_of(name)));
                }
                (None, _) => {
                    return Err(syntax(line, "entry outside of any block"));
                }
                (Some((open, _)), ["end", name]) => {
                    if open != name {
                        return Err(syntax(
                            line,
                            format!("expected 'end {open}', found 'end {name}'"),
                        ));
                    }
                    current = None;
                }
                (Some((open, _)), ["end", ..]) => {
                    return Err(syntax(line, format!("invalid end of {open} block")));
                }
                (Some((_, None)), _) => {}
                (Some((_, Some(block))), _) => match block {
                    Block::Parameters => def.parameters.push(parse_element(line, &tokens)?),
                    Block::Species => def.species.push(parse_element(line, &tokens)?),
                    Block::Groups => {
                        if let Some(group) = parse_group(line, &tokens)? {
                            def.groups.push(group);
                        }
                    }
                    Block::Functions => def.functions.push(parse_function(line, &tokens)?),
                    Block::Reactions => def.reactions.push(parse_reaction(line, &tokens)?),
                },
            }
        }

        if let Some((open, _)) = current {
            return Err(NetworkError::Unterminated { block: open });
        }
        Ok(def)
    }
}

fn syntax(line: usize, message: impl Into<String>) -> NetworkError {
    NetworkError::Syntax {
        line,
        message: message.into(),
    }
}

/// Split an optional `factor*` prefix off a token.
fn split_factor(token: &str) -> (f64, &str) {
    if let Some((head, tail)) = token.split_once('*') {
        if let Ok(factor) = head.parse::<f64>() {
            if !tail.is_empty() {
                return (factor, tail);
            }
        }
    }
    (1.0, token)
}

/// Leading index, if the first token is an integer.
fn split_index<'a, 'b>(tokens: &'a [&'b str]) -> (Option<usize>, &'a [&'b str]) {
    match tokens.first().map(|tok| tok.parse::<usize>()) {
        Some(Ok(index)) => (Some(index), &tokens[1..]),
        _ => (None, tokens),
    }
}

fn parse_element(line: usize, tokens: &[&str]) -> Result<ElementDef, NetworkError> {
    let (index, rest) = split_index(tokens);
    let (name, value) = match rest {
        [name] => (*name, ValueDef::Absent),
        [name, value] => {
            let value = match value.parse::<f64>() {
                Ok(num) => ValueDef::Number(num),
                Err(_) => {
                    let (factor, name) = split_factor(value);
                    match name.parse::<f64>() {
                        Ok(num) => ValueDef::Number(factor * num),
                        Err(_) => ValueDef::Scaled {
                            factor,
                            name: name.to_string(),
                        },
                    }
                }
            };
            (*name, value)
        }
        [] => return Err(syntax(line, "missing element name")),
        _ => return Err(syntax(line, "invalid list entry")),
    };

    let fixed = name.contains('$');
    Ok(ElementDef {
        line,
        index,
        name: name.replace('$', ""),
        fixed,
        value,
    })
}

fn parse_group(line: usize, tokens: &[&str]) -> Result<Option<GroupDef>, NetworkError> {
    let (index, rest) = split_index(tokens);
    let Some((name, entries)) = rest.split_first() else {
        return Err(syntax(line, "missing group name"));
    };
    if entries.first() == Some(&"expression") {
        log::debug!("ignoring expression group {name} at line {line}");
        return Ok(None);
    }

    let entries = entries
        .iter()
        .flat_map(|tok| tok.split(','))
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            let (weight, target) = split_factor(tok);
            (SpeciesRef::parse(target), weight)
        })
        .collect();

    Ok(Some(GroupDef {
        line,
        index,
        name: name.to_string(),
        entries,
    }))
}

fn parse_function(line: usize, tokens: &[&str]) -> Result<FunctionDef, NetworkError> {
    let (index, rest) = split_index(tokens);
    let [name, expression @ ..] = rest else {
        return Err(syntax(line, "missing function name"));
    };
    if expression.is_empty() {
        return Err(syntax(line, format!("function {name} has no expression")));
    }
    let name = name.strip_suffix("()").unwrap_or(name);
    Ok(FunctionDef {
        line,
        index,
        name: name.to_string(),
        expression: expression.join(" "),
    })
}

fn parse_species_list(list: &str) -> Vec<SpeciesRef> {
    list.split(',')
        .filter(|tok| !tok.is_empty())
        .map(SpeciesRef::parse)
        // Index 0 is the null species.
        .filter(|sref| *sref != SpeciesRef::Index(0))
        .collect()
}

fn parse_reaction(line: usize, tokens: &[&str]) -> Result<ReactionDef, NetworkError> {
    let [index, reactants, products, rate_law @ ..] = tokens else {
        return Err(syntax(line, "invalid list entry"));
    };
    if rate_law.is_empty() {
        return Err(syntax(line, "missing rate law"));
    }
    let index = index
        .parse()
        .map_err(|_| syntax(line, format!("invalid index {index:?}")))?;

    let (stat_factor, head) = split_factor(rate_law[0]);
    let (keyword, params) = if rate_law.len() == 1 {
        (None, vec![head.to_string()])
    } else {
        let params = rate_law[1..].iter().map(|tok| tok.to_string()).collect();
        (Some(head.to_string()), params)
    };

    Ok(ReactionDef {
        line,
        index,
        reactants: parse_species_list(reactants),
        products: parse_species_list(products),
        stat_factor,
        keyword,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: &str = "
# simple dimerization
begin parameters
    1 k1 1.0
    2 k2 0.5
end parameters
begin species
    1 A   100
    2 $B  2*k1
    3 C
end species
begin reactions
    1 1,1 2     0.5*k1
    2 2   0     k2
    3 A,B C     Sat k1 k2
end reactions
begin groups
    1 Total 1,2*2
    2 Expr  expression x+y
end groups
begin functions
    1 f() k1 * Total
end functions
";

    #[test]
    fn test_read_blocks() {
        let def: NetworkDef = NET.parse().unwrap();
        assert_eq!(def.parameters.len(), 2);
        assert_eq!(def.species.len(), 3);

        let b = &def.species[1];
        assert_eq!(b.name, "B");
        assert!(b.fixed);
        assert_eq!(
            b.value,
            ValueDef::Scaled {
                factor: 2.0,
                name: "k1".into()
            }
        );
        assert_eq!(def.species[2].value, ValueDef::Absent);

        let dimer = &def.reactions[0];
        assert_eq!(dimer.reactants, vec![SpeciesRef::Index(1), SpeciesRef::Index(1)]);
        assert_eq!(dimer.stat_factor, 0.5);
        assert_eq!(dimer.keyword, None);
        assert_eq!(dimer.params, vec!["k1"]);

        // Null species is dropped.
        assert!(def.reactions[1].products.is_empty());

        let sat = &def.reactions[2];
        assert_eq!(sat.reactants[0], SpeciesRef::Name("A".into()));
        assert_eq!(sat.keyword.as_deref(), Some("Sat"));
        assert_eq!(sat.params, vec!["k1", "k2"]);

        assert_eq!(def.groups.len(), 1);
        assert_eq!(def.groups[0].entries[1], (SpeciesRef::Index(2), 2.0));

        assert_eq!(def.functions[0].name, "f");
        assert_eq!(def.functions[0].expression, "k1 * Total");
    }

    #[test]
    fn test_read_errors_carry_line() {
        let err = "begin species\n1 A 1 2 3\nend species\n"
            .parse::<NetworkDef>()
            .unwrap_err();
        assert!(matches!(err, NetworkError::Syntax { line: 2, .. }));

        let err = "begin reactions\n1 1 2\nend reactions\n"
            .parse::<NetworkDef>()
            .unwrap_err();
        assert!(matches!(err, NetworkError::Syntax { line: 2, .. }));

        let err = "begin species\n1 A 1\n".parse::<NetworkDef>().unwrap_err();
        assert!(matches!(err, NetworkError::Unterminated { .. }));

        let err = "begin species\n1 A 1\nend reactions\n"
            .parse::<NetworkDef>()
            .unwrap_err();
        assert!(matches!(err, NetworkError::Syntax { line: 3, .. }));
    }

    #[test]
    fn test_unknown_blocks_are_skipped() {
        let def: NetworkDef = "begin compartments\nfoo bar baz\nend compartments\n"
            .parse()
            .unwrap();
        assert!(def.is_empty());
    }
}
