/**
 * FILTER PARSER - Construction des clauses de filtrage des graphes
 *
 * RÔLE :
 * Traduit le mini-langage de filtres des spécifications de graphes en clauses
 * applicables aux documents JSON projetés par le store : dates relatives
 * ("-2y", "9m", "55d"), listes disjonctives ("1,2"), listes conjonctives,
 * suffixes de lookup (__gte, __gt, __lte, __lt).
 *
 * FONCTIONNEMENT :
 * - Chaque entrée du mapping de filtres devient une Clause (AST, parsée une fois)
 * - Les chemins de champs traversent les relations avec "__" et se déploient
 *   sur les relations multi-valuées (une valeur par ligne liée)
 * - Une clause matche un document si l'une des valeurs déployées satisfait l'op
 */

use serde_json::{Map, Value};
use std::cmp::Ordering;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime};

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

static JSON_NULL: Value = Value::Null;

/// Spécification de filtre ou d'expression malformée. Remontée telle quelle, pas de retry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid relative date spec '{0}'")]
    FromNow(String),
    #[error("unknown lookup '{0}'")]
    Lookup(String),
    #[error("invalid label expression '{0}'")]
    Label(String),
    #[error("invalid series expression '{0}'")]
    Series(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    Gte,
    Gt,
    Lte,
    Lt,
}

/// Clause de filtrage compilée, applicable à un document projeté.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Cmp { path: String, op: Lookup, value: Value },
    Or(Vec<Clause>),
    And(Vec<Clause>),
}

impl Clause {
    fn eq(path: &str, op: Lookup, value: Value) -> Self {
        Clause::Cmp { path: path.to_string(), op, value }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Clause::Cmp { path, op, value } => {
                resolve_path(doc, path).iter().any(|v| lookup_matches(v, *op, value))
            }
            Clause::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Clause::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
        }
    }
}

/// Sépare un éventuel suffixe de lookup du chemin de champ.
pub fn split_lookup(key: &str) -> (&str, Lookup) {
    const SUFFIXES: [(&str, Lookup); 4] = [
        ("__gte", Lookup::Gte),
        ("__gt", Lookup::Gt),
        ("__lte", Lookup::Lte),
        ("__lt", Lookup::Lt),
    ];
    for (suffix, op) in SUFFIXES {
        if let Some(path) = key.strip_suffix(suffix) {
            if !path.is_empty() {
                return (path, op);
            }
        }
    }
    (key, Lookup::Exact)
}

/// Résout un chemin "a__b__c" dans un document, en se déployant sur les
/// tableaux (une valeur par ligne liée). Champ absent ou relation nulle -> Null.
pub fn resolve_path<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = vec![doc];
    for segment in path.split("__") {
        let mut next: Vec<&Value> = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.push(map.get(segment).unwrap_or(&JSON_NULL)),
                Value::Array(items) => {
                    for item in items {
                        match item {
                            Value::Object(map) => next.push(map.get(segment).unwrap_or(&JSON_NULL)),
                            Value::Null => next.push(&JSON_NULL),
                            _ => {}
                        }
                    }
                }
                Value::Null => next.push(&JSON_NULL),
                _ => {}
            }
        }
        current = next;
    }
    // un champ terminal multi-valué (tags, membres...) se déploie aussi
    current
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect::<Vec<&Value>>(),
            other => vec![other],
        })
        .collect()
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Égalité tolérante : les valeurs venant des query params arrivent en texte
/// alors que les champs projetés sont typés ("1" == 1, "true" == true).
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if a.is_null() || b.is_null() {
        return false;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    value_text(a) == value_text(b)
}

/// Comparaison d'ordre : numérique quand les deux côtés sont numériques,
/// lexicale sinon (les dates ISO "YYYY-MM-DD" s'ordonnent correctement en texte).
pub fn loose_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    Some(value_text(a).cmp(&value_text(b)))
}

pub fn lookup_matches(doc_value: &Value, op: Lookup, filter_value: &Value) -> bool {
    match op {
        Lookup::Exact => loose_eq(doc_value, filter_value),
        ordered => match loose_cmp(doc_value, filter_value) {
            Some(ord) => match ordered {
                Lookup::Gte => ord != Ordering::Less,
                Lookup::Gt => ord == Ordering::Greater,
                Lookup::Lte => ord != Ordering::Greater,
                Lookup::Lt => ord == Ordering::Less,
                Lookup::Exact => false,
            },
            None => false,
        },
    }
}

/// Spec de date relative : signe optionnel, entier, unité y/m/d.
pub fn is_from_now_spec(spec: &str) -> bool {
    let Some(unit) = spec.chars().last() else { return false };
    if !matches!(unit, 'y' | 'm' | 'd') {
        return false;
    }
    let digits = spec[..spec.len() - 1].strip_prefix('-').unwrap_or(&spec[..spec.len() - 1]);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// `today + offset` pour une spec relative. Les décalages mois/année clampent
/// le jour sur la longueur du mois cible (31 janv + 1m -> 29 févr).
pub fn from_now(today: Date, spec: &str) -> Result<Date, ParseError> {
    if !is_from_now_spec(spec) {
        return Err(ParseError::FromNow(spec.to_string()));
    }
    let unit = spec.as_bytes()[spec.len() - 1] as char;
    let count: i32 = spec[..spec.len() - 1]
        .parse()
        .map_err(|_| ParseError::FromNow(spec.to_string()))?;
    let shifted = match unit {
        'd' => today.checked_add(Duration::days(count as i64)),
        'm' => add_months(today, count),
        'y' => add_months(today, count.checked_mul(12).unwrap_or(i32::MAX)),
        _ => None,
    };
    shifted.ok_or_else(|| ParseError::FromNow(spec.to_string()))
}

fn add_months(date: Date, months: i32) -> Option<Date> {
    const MONTHS: [Month; 12] = [
        Month::January,
        Month::February,
        Month::March,
        Month::April,
        Month::May,
        Month::June,
        Month::July,
        Month::August,
        Month::September,
        Month::October,
        Month::November,
        Month::December,
    ];
    let zero_based = date
        .year()
        .checked_mul(12)?
        .checked_add(date.month() as i32 - 1)?
        .checked_add(months)?;
    let year = zero_based.div_euclid(12);
    let month = MONTHS[zero_based.rem_euclid(12) as usize];
    let day = date.day().min(month.length(year));
    Date::from_calendar_date(year, month, day).ok()
}

pub fn format_iso(date: Date) -> String {
    date.format(ISO_DATE).unwrap_or_default()
}

/// Constructeur de clauses pour un jeu de documents projetés.
/// Sans état entre invocations ; les builders sont appelables indépendamment
/// par le décodeur de query params.
pub struct FilterParser<'a> {
    records: &'a [Value],
}

impl<'a> FilterParser<'a> {
    pub fn new(records: &'a [Value]) -> Self {
        Self { records }
    }

    /// Clause `{key: aujourd'hui + offset}` pour une spec `-?\d+[ymd]`.
    pub fn filter_from_now(&self, key: &str, spec: &str) -> Result<Clause, ParseError> {
        let date = from_now(OffsetDateTime::now_utc().date(), spec)?;
        let (path, op) = split_lookup(key);
        Ok(Clause::eq(path, op, Value::String(format_iso(date))))
    }

    /// Disjonction sur des littéraux séparés par des virgules.
    /// Une valeur seule dégénère en simple égalité.
    pub fn filter_or(&self, key: &str, value: &str) -> Clause {
        let (path, op) = split_lookup(key);
        let mut clauses: Vec<Clause> = value
            .split(',')
            .map(|v| Clause::eq(path, op, Value::String(v.to_string())))
            .collect();
        if clauses.len() == 1 {
            return clauses.remove(0);
        }
        Clause::Or(clauses)
    }

    /// Conjonction sur une séquence ordonnée de littéraux.
    pub fn filter_and(&self, key: &str, values: &[Value]) -> Clause {
        let (path, op) = split_lookup(key);
        Clause::And(
            values
                .iter()
                .map(|v| Clause::eq(path, op, v.clone()))
                .collect(),
        )
    }

    /// Décode une entrée du mapping de filtres :
    /// liste -> conjonction ; "a,b" -> disjonction ; spec relative -> date
    /// calculée ; tout autre littéral -> égalité (null matche les champs nuls).
    pub fn parse_entry(&self, key: &str, value: &Value) -> Result<Clause, ParseError> {
        match value {
            Value::Array(items) => Ok(self.filter_and(key, items)),
            Value::String(s) if is_from_now_spec(s) => self.filter_from_now(key, s),
            Value::String(s) if s.contains(',') => Ok(self.filter_or(key, s)),
            other => {
                let (path, op) = split_lookup(key);
                Ok(Clause::eq(path, op, other.clone()))
            }
        }
    }

    /// Applique le mapping complet de filtres pré-agrégation aux documents.
    pub fn get_queryset(&self, filters: &Map<String, Value>) -> Result<Vec<&'a Value>, ParseError> {
        let mut clauses = Vec::with_capacity(filters.len());
        for (key, value) in filters {
            clauses.push(self.parse_entry(key, value)?);
        }
        Ok(self
            .records
            .iter()
            .filter(|doc| clauses.iter().all(|c| c.matches(doc)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    #[test]
    fn test_from_now_offsets() {
        let today = date!(2016 - 06 - 15);
        assert_eq!(from_now(today, "2y").unwrap(), date!(2018 - 06 - 15));
        assert_eq!(from_now(today, "-2y").unwrap(), date!(2014 - 06 - 15));
        assert_eq!(from_now(today, "9m").unwrap(), date!(2017 - 03 - 15));
        assert_eq!(from_now(today, "-9m").unwrap(), date!(2015 - 09 - 15));
        assert_eq!(from_now(today, "55d").unwrap(), date!(2016 - 08 - 09));
        assert_eq!(from_now(today, "-55d").unwrap(), date!(2016 - 04 - 21));
    }

    #[test]
    fn test_from_now_clamps_day_to_target_month() {
        assert_eq!(from_now(date!(2016 - 01 - 31), "1m").unwrap(), date!(2016 - 02 - 29));
        assert_eq!(from_now(date!(2016 - 02 - 29), "1y").unwrap(), date!(2017 - 02 - 28));
        assert_eq!(from_now(date!(2016 - 03 - 31), "-1m").unwrap(), date!(2016 - 02 - 29));
    }

    #[test]
    fn test_from_now_rejects_malformed_specs() {
        for spec in ["", "y", "5", "5w", "--5d", "5m5", "d5", "-d"] {
            assert!(from_now(date!(2016 - 06 - 15), spec).is_err(), "spec {spec:?}");
        }
    }

    #[test]
    fn test_filter_from_now_formats_today_plus_offset() {
        let parser = FilterParser::new(&[]);
        let clause = parser.filter_from_now("foo", "-2y").unwrap();
        let expected = from_now(OffsetDateTime::now_utc().date(), "-2y").unwrap();
        assert_eq!(
            clause,
            Clause::Cmp {
                path: "foo".into(),
                op: Lookup::Exact,
                value: Value::String(format_iso(expected)),
            }
        );
    }

    #[test]
    fn test_filter_or_single_value_degenerates_to_equality() {
        let parser = FilterParser::new(&[]);
        assert_eq!(
            parser.filter_or("key", "1"),
            Clause::Cmp { path: "key".into(), op: Lookup::Exact, value: json!("1") }
        );
    }

    #[test]
    fn test_filter_or_builds_disjunction() {
        let parser = FilterParser::new(&[]);
        let clause = parser.filter_or("key", "1,2");
        assert_eq!(
            clause,
            Clause::Or(vec![
                Clause::Cmp { path: "key".into(), op: Lookup::Exact, value: json!("1") },
                Clause::Cmp { path: "key".into(), op: Lookup::Exact, value: json!("2") },
            ])
        );
        assert!(clause.matches(&json!({"key": "2"})));
        assert!(!clause.matches(&json!({"key": "3"})));
    }

    #[test]
    fn test_filter_and_builds_conjunction() {
        let parser = FilterParser::new(&[]);
        let clause = parser.filter_and("key", &[json!("1"), json!("2")]);
        assert_eq!(
            clause,
            Clause::And(vec![
                Clause::Cmp { path: "key".into(), op: Lookup::Exact, value: json!("1") },
                Clause::Cmp { path: "key".into(), op: Lookup::Exact, value: json!("2") },
            ])
        );
        // conjonction sur un champ multi-valué : chaque littéral doit matcher une valeur
        assert!(clause.matches(&json!({"key": ["1", "2"]})));
        assert!(!clause.matches(&json!({"key": ["1"]})));
    }

    #[test]
    fn test_split_lookup() {
        assert_eq!(split_lookup("delivery_date__gte"), ("delivery_date", Lookup::Gte));
        assert_eq!(split_lookup("series__lt"), ("series", Lookup::Lt));
        assert_eq!(split_lookup("orientation"), ("orientation", Lookup::Exact));
        // "__gte" seul n'est pas un chemin valide, on le garde tel quel
        assert_eq!(split_lookup("__gte"), ("__gte", Lookup::Exact));
    }

    #[test]
    fn test_resolve_path_fans_out_over_relations() {
        let doc = json!({
            "licences": [
                {"licence": {"valid_thru": "2016-01-01"}},
                {"licence": {"valid_thru": "2016-02-01"}},
            ]
        });
        let values = resolve_path(&doc, "licences__licence__valid_thru");
        assert_eq!(values, vec![&json!("2016-01-01"), &json!("2016-02-01")]);
    }

    #[test]
    fn test_null_equality_matches_missing_and_null_fields() {
        let clause = Clause::Cmp { path: "orientation".into(), op: Lookup::Exact, value: Value::Null };
        assert!(clause.matches(&json!({"orientation": null})));
        assert!(clause.matches(&json!({})));
        assert!(!clause.matches(&json!({"orientation": "top"})));
    }

    #[test]
    fn test_loose_comparisons() {
        assert!(loose_eq(&json!("1"), &json!(1)));
        assert!(loose_eq(&json!(true), &json!("true")));
        assert!(!loose_eq(&json!(null), &json!("x")));
        assert_eq!(loose_cmp(&json!("2016-01-01"), &json!("2017-01-01")), Some(Ordering::Less));
        assert_eq!(loose_cmp(&json!(10), &json!("9")), Some(Ordering::Greater));
    }

    #[test]
    fn test_get_queryset_combines_clauses() {
        let records = vec![
            json!({"delivery_date": "2015-01-01", "active": true}),
            json!({"delivery_date": "2016-06-01", "active": true}),
            json!({"delivery_date": "2016-06-01", "active": false}),
        ];
        let parser = FilterParser::new(&records);
        let mut filters = Map::new();
        filters.insert("delivery_date__gte".into(), json!("2016-01-01"));
        filters.insert("active".into(), json!(true));
        let kept = parser.get_queryset(&filters).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["delivery_date"], json!("2016-06-01"));
    }
}
