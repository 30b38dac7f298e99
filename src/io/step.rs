// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! STEP exchange-structure parser using pest
//!
//! Produces an untyped entity table. Interpreting entities as geometry and
//! topology happens in the reader.

use crate::error::ParseError;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use std::collections::BTreeMap;

#[derive(Parser)]
#[grammar = "io/step.pest"]
struct StepParser;

/// One parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Ref(u64),
    Real(f64),
    Integer(i64),
    String(String),
    Enum(String),
    Binary(String),
    /// Typed parameter such as `LENGTH_MEASURE(25.4)`
    Typed(String, Vec<Value>),
    List(Vec<Value>),
    Omitted,
    Derived,
}

impl Value {
    pub fn as_ref_id(&self) -> Option<u64> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric value; integers widen and single-valued typed parameters unwrap
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Typed(_, inner) if inner.len() == 1 => inner[0].as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&str> {
        match self {
            Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.as_enum()? {
            "T" => Some(true),
            "F" => Some(false),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Omitted | Self::Derived)
    }
}

/// `NAME(params...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub name: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Simple(Record),
    /// Complex instance `( A(..) B(..) )`
    Complex(Vec<Record>),
}

impl Entity {
    /// Name of a simple instance, or a `+`-joined list for complex ones
    pub fn type_name(&self) -> String {
        match self {
            Self::Simple(record) => record.name.clone(),
            Self::Complex(parts) => parts.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join("+"),
        }
    }

    /// Record with the given name, whether simple or part of a complex instance
    pub fn record(&self, name: &str) -> Option<&Record> {
        match self {
            Self::Simple(record) => (record.name == name).then_some(record),
            Self::Complex(parts) => parts.iter().find(|p| p.name == name),
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.record(name).is_some()
    }

    pub fn as_simple(&self) -> Option<&Record> {
        match self {
            Self::Simple(record) => Some(record),
            Self::Complex(_) => None,
        }
    }
}

/// Parsed exchange file
#[derive(Debug, Clone, Default)]
pub struct StepFile {
    pub header: Vec<Record>,
    pub entities: BTreeMap<u64, Entity>,
}

impl StepFile {
    pub fn get(&self, id: u64) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Simple instances of one entity type in ascending id order
    pub fn instances_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (u64, &'a Record)> + 'a {
        self.entities
            .iter()
            .filter_map(move |(id, entity)| entity.as_simple().filter(|r| r.name == name).map(|r| (*id, r)))
    }

    fn header_string(&self, record: &str, index: usize) -> Option<&str> {
        self.header
            .iter()
            .find(|r| r.name == record)
            .and_then(|r| r.params.get(index))
            .and_then(Value::as_str)
    }

    /// `FILE_NAME` name field
    pub fn file_name(&self) -> Option<&str> {
        self.header_string("FILE_NAME", 0)
    }

    /// First schema listed in `FILE_SCHEMA`
    pub fn schema(&self) -> Option<&str> {
        self.header
            .iter()
            .find(|r| r.name == "FILE_SCHEMA")
            .and_then(|r| r.params.first())
            .and_then(Value::as_list)
            .and_then(|list| list.first())
            .and_then(Value::as_str)
    }
}

/// Parse STEP text into its entity table
pub fn parse_step(source: &str) -> Result<StepFile, ParseError> {
    let file = StepParser::parse(Rule::file, source)
        .map_err(|e| ParseError::Syntax(e.to_string()))?
        .next()
        .ok_or_else(|| ParseError::Syntax("empty document".to_string()))?;

    let mut step = StepFile::default();
    for section in file.into_inner() {
        match section.as_rule() {
            Rule::header => {
                for record in section.into_inner() {
                    if let Some(simple) = record.into_inner().next() {
                        step.header.push(parse_record(simple)?);
                    }
                }
            }
            Rule::data_section => {
                for instance in section.into_inner().filter(|p| p.as_rule() == Rule::instance) {
                    let (id, entity) = parse_instance(instance)?;
                    if step.entities.insert(id, entity).is_some() {
                        return Err(ParseError::DuplicateEntity(id));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(step)
}

fn parse_instance(pair: Pair<Rule>) -> Result<(u64, Entity), ParseError> {
    let mut inner = pair.into_inner();
    let id = match inner.next() {
        Some(p) => parse_id(p.as_str())?,
        None => return Err(ParseError::Syntax("instance without id".to_string())),
    };
    let body = inner
        .next()
        .ok_or_else(|| ParseError::malformed(id, "instance without record"))?;

    let entity = match body.as_rule() {
        Rule::complex_record => Entity::Complex(body.into_inner().map(parse_record).collect::<Result<_, _>>()?),
        _ => Entity::Simple(parse_record(body)?),
    };
    Ok((id, entity))
}

fn parse_record(pair: Pair<Rule>) -> Result<Record, ParseError> {
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .map(|p| p.as_str().to_ascii_uppercase())
        .ok_or_else(|| ParseError::Syntax("record without keyword".to_string()))?;
    let params = match inner.next() {
        Some(list) => parse_list(list)?,
        None => Vec::new(),
    };
    Ok(Record { name, params })
}

fn parse_list(pair: Pair<Rule>) -> Result<Vec<Value>, ParseError> {
    pair.into_inner().map(parse_value).collect()
}

fn parse_value(pair: Pair<Rule>) -> Result<Value, ParseError> {
    let text = pair.as_str();
    let bad = |what: &str| ParseError::Syntax(format!("invalid {what} '{text}'"));

    Ok(match pair.as_rule() {
        Rule::entity_ref => Value::Ref(parse_id(text)?),
        Rule::real => Value::Real(text.parse().map_err(|_| bad("real"))?),
        Rule::integer => Value::Integer(text.parse().map_err(|_| bad("integer"))?),
        Rule::string => Value::String(text[1..text.len() - 1].replace("''", "'")),
        Rule::enumeration => Value::Enum(text.trim_matches('.').to_ascii_uppercase()),
        Rule::binary => Value::Binary(text.trim_matches('"').to_string()),
        Rule::omitted => Value::Omitted,
        Rule::derived => Value::Derived,
        Rule::list => Value::List(parse_list(pair)?),
        Rule::typed => {
            let record = parse_record(pair)?;
            Value::Typed(record.name, record.params)
        }
        other => return Err(ParseError::Syntax(format!("unexpected {other:?} '{text}'"))),
    })
}

fn parse_id(text: &str) -> Result<u64, ParseError> {
    text.trim_start_matches('#')
        .parse()
        .map_err(|_| ParseError::Syntax(format!("invalid entity id '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"ISO-10303-21;
HEADER;
FILE_DESCRIPTION(('test'),'2;1');
FILE_NAME('part.step','2025-01-01T00:00:00',('me'),(''),'','','');
FILE_SCHEMA(('AUTOMOTIVE_DESIGN { 1 0 10303 214 1 1 1 1 }'));
ENDSEC;
DATA;
/* a comment */
#1 = CARTESIAN_POINT('origin', (0., 1.5, -2.E-1));
#2 = DIRECTION('', (0.0, 0.0, 1.0));
#3 = ( LENGTH_UNIT() NAMED_UNIT(*) SI_UNIT(.MILLI., .METRE.) );
#4 = LENGTH_MEASURE_WITH_UNIT(LENGTH_MEASURE(25.4), #3);
#5 = PRODUCT('it''s', 'name', $, (#1, #2));
#6 = EDGE_CURVE('', #1, #1, #2, .T.);
ENDSEC;
END-ISO-10303-21;
"#;

    #[test]
    fn test_parse_sample() {
        let step = parse_step(SAMPLE).unwrap();
        assert_eq!(step.len(), 6);
        assert_eq!(step.file_name(), Some("part.step"));
        assert!(step.schema().unwrap().starts_with("AUTOMOTIVE_DESIGN"));

        let point = step.get(1).and_then(Entity::as_simple).unwrap();
        assert_eq!(point.name, "CARTESIAN_POINT");
        let coords: Vec<f64> = point.params[1].as_list().unwrap().iter().filter_map(Value::as_f64).collect();
        assert_eq!(coords, vec![0.0, 1.5, -0.2]);
    }

    #[test]
    fn test_complex_and_typed() {
        let step = parse_step(SAMPLE).unwrap();
        let unit = step.get(3).unwrap();
        assert!(unit.is("LENGTH_UNIT"));
        assert_eq!(unit.record("SI_UNIT").unwrap().params[0], Value::Enum("MILLI".into()));
        assert_eq!(unit.type_name(), "LENGTH_UNIT+NAMED_UNIT+SI_UNIT");

        let measure = step.get(4).and_then(Entity::as_simple).unwrap();
        assert_eq!(measure.params[0].as_f64(), Some(25.4));
        assert_eq!(measure.params[1].as_ref_id(), Some(3));
    }

    #[test]
    fn test_strings_enums_and_unset() {
        let step = parse_step(SAMPLE).unwrap();
        let product = step.get(5).and_then(Entity::as_simple).unwrap();
        assert_eq!(product.params[0].as_str(), Some("it's"));
        assert!(product.params[2].is_unset());
        let edge = step.get(6).and_then(Entity::as_simple).unwrap();
        assert_eq!(edge.params[4].as_bool(), Some(true));
        assert_eq!(step.instances_of("EDGE_CURVE").count(), 1);
    }

    #[test]
    fn test_duplicate_entity() {
        let text = SAMPLE.replace("#6 = EDGE_CURVE", "#5 = EDGE_CURVE");
        assert!(matches!(parse_step(&text), Err(ParseError::DuplicateEntity(5))));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(parse_step("ISO-10303-21;\nHEADER;"), Err(ParseError::Syntax(_))));
        assert!(matches!(parse_step("solid cube\nendsolid"), Err(ParseError::Syntax(_))));
    }
}
