/**
 * QUERY SURFACE - Lecture paginée de l'historique persistant
 *
 * RÔLE :
 * Langage de requête commun aux collections d'historique (actions lampes,
 * relevés capteurs, vent) : pagination, recherche libre, tri, filtres.
 *
 * FONCTIONNEMENT :
 * - Chaque collection déclare ses colonnes triables / cherchables / filtrables
 * - Colonne de tri hors liste autorisée -> repli silencieux sur `id`
 * - Ordre `ASC`/`DESC` insensible à la casse, `DESC` si invalide
 * - Recherche et filtres = sous-chaîne insensible à la casse sur le texte des colonnes
 */

use crate::models::{ActionHistoryRecord, SensorReading, WindSpeedSample};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const DEFAULT_SORT: &str = "id";
pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("ASC") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }
}

/// Collection interrogeable via la query surface
pub trait Queryable: Clone {
    /// Colonnes autorisées pour `sort`
    const SORT_FIELDS: &'static [&'static str];
    /// Colonnes couvertes par `search`
    const SEARCH_FIELDS: &'static [&'static str];
    /// Paramètre de filtre -> colonne ciblée
    const FILTER_FIELDS: &'static [(&'static str, &'static str)];

    fn id(&self) -> u64;
    fn field_text(&self, column: &str) -> Option<String>;
    fn compare(&self, other: &Self, column: &str) -> Ordering;
}

/// Page de résultats, sérialisée `{ "totalCount": n, "data": [...] }`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_count: usize,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub page: usize,
    pub limit: usize,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub order: SortOrder,
    pub filters: HashMap<String, String>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 0,
            limit: DEFAULT_LIMIT,
            search: None,
            sort: None,
            order: SortOrder::Desc,
            filters: HashMap::new(),
        }
    }
}

impl HistoryQuery {
    /// Construit la requête depuis les query params HTTP ; valeurs invalides -> défauts
    pub fn from_params(params: HashMap<String, String>) -> Self {
        let mut query = Self::default();
        for (key, value) in params {
            match key.as_str() {
                "page" => {
                    if let Ok(page) = value.trim().parse::<usize>() {
                        query.page = page;
                    }
                }
                "limit" => {
                    if let Ok(limit) = value.trim().parse::<usize>() {
                        if limit > 0 {
                            query.limit = limit.min(MAX_LIMIT);
                        }
                    }
                }
                "search" => query.search = non_empty(value),
                "sort" => query.sort = non_empty(value),
                "order" => query.order = SortOrder::parse(&value),
                _ => {
                    // Autres paramètres = filtres, retenus seulement si la collection les connaît
                    if let Some(v) = non_empty(value) {
                        query.filters.insert(key, v);
                    }
                }
            }
        }
        query
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.limit)
    }

    /// Colonne de tri effective pour la collection `T`
    pub fn sort_column<T: Queryable>(&self) -> &'static str {
        self.sort
            .as_deref()
            .and_then(|s| T::SORT_FIELDS.iter().copied().find(|f| *f == s))
            .unwrap_or(DEFAULT_SORT)
    }

    fn matches<T: Queryable>(&self, row: &T) -> bool {
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = T::SEARCH_FIELDS.iter().any(|col| contains(row.field_text(col), &needle));
            if !T::SEARCH_FIELDS.is_empty() && !hit {
                return false;
            }
        }
        T::FILTER_FIELDS.iter().all(|(param, col)| match self.filters.get(*param) {
            Some(value) => contains(row.field_text(col), &value.to_lowercase()),
            None => true,
        })
    }

    pub fn run<T: Queryable>(&self, rows: &[T]) -> Page<T> {
        let column = self.sort_column::<T>();
        let mut hits: Vec<&T> = rows.iter().filter(|r| self.matches(*r)).collect();
        hits.sort_by(|a, b| {
            let ord = a.compare(b, column).then_with(|| a.id().cmp(&b.id()));
            match self.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        Page {
            total_count: hits.len(),
            data: hits
                .into_iter()
                .skip(self.offset())
                .take(self.limit)
                .cloned()
                .collect(),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn contains(text: Option<String>, needle_lower: &str) -> bool {
    text.map(|t| t.to_lowercase().contains(needle_lower)).unwrap_or(false)
}

fn date_text(date: &OffsetDateTime) -> String {
    date.format(&Rfc3339).unwrap_or_default()
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

// null avant toute valeur, comme un ORDER BY ASC SQL
fn cmp_opt_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp_f64(a, b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

impl Queryable for ActionHistoryRecord {
    const SORT_FIELDS: &'static [&'static str] = &["id", "device", "action", "date_action"];
    const SEARCH_FIELDS: &'static [&'static str] = &["device", "action", "date_action"];
    const FILTER_FIELDS: &'static [(&'static str, &'static str)] =
        &[("date", "date_action"), ("device", "device"), ("action", "action")];

    fn id(&self) -> u64 {
        self.id
    }

    fn field_text(&self, column: &str) -> Option<String> {
        match column {
            "id" => Some(self.id.to_string()),
            "device" => Some(self.device.clone()),
            "action" => Some(self.action.to_string()),
            "date_action" => Some(date_text(&self.date_action)),
            _ => None,
        }
    }

    fn compare(&self, other: &Self, column: &str) -> Ordering {
        match column {
            "device" => self.device.cmp(&other.device),
            "action" => self.action.cmp(&other.action),
            "date_action" => self.date_action.cmp(&other.date_action),
            _ => self.id.cmp(&other.id),
        }
    }
}

impl Queryable for WindSpeedSample {
    const SORT_FIELDS: &'static [&'static str] = &["id", "wind_speed", "date_wind"];
    const SEARCH_FIELDS: &'static [&'static str] = &[];
    const FILTER_FIELDS: &'static [(&'static str, &'static str)] = &[];

    fn id(&self) -> u64 {
        self.id
    }

    fn field_text(&self, column: &str) -> Option<String> {
        match column {
            "id" => Some(self.id.to_string()),
            "wind_speed" => Some(self.wind_speed.to_string()),
            "date_wind" => Some(date_text(&self.date_wind)),
            _ => None,
        }
    }

    fn compare(&self, other: &Self, column: &str) -> Ordering {
        match column {
            "wind_speed" => cmp_f64(self.wind_speed, other.wind_speed),
            "date_wind" => self.date_wind.cmp(&other.date_wind),
            _ => self.id.cmp(&other.id),
        }
    }
}

impl Queryable for SensorReading {
    const SORT_FIELDS: &'static [&'static str] = &["id", "temperature", "humidity", "light", "date_iot"];
    const SEARCH_FIELDS: &'static [&'static str] = &["temperature", "humidity", "light", "date_iot"];
    const FILTER_FIELDS: &'static [(&'static str, &'static str)] =
        &[("date", "date_iot"), ("temperature", "temperature")];

    fn id(&self) -> u64 {
        self.id
    }

    fn field_text(&self, column: &str) -> Option<String> {
        match column {
            "id" => Some(self.id.to_string()),
            "temperature" => self.temperature.map(|v| v.to_string()),
            "humidity" => self.humidity.map(|v| v.to_string()),
            "light" => self.light.map(|v| v.to_string()),
            "date_iot" => Some(date_text(&self.date_iot)),
            _ => None,
        }
    }

    fn compare(&self, other: &Self, column: &str) -> Ordering {
        match column {
            "temperature" => cmp_opt_f64(self.temperature, other.temperature),
            "humidity" => cmp_opt_f64(self.humidity, other.humidity),
            "light" => cmp_opt_f64(self.light, other.light),
            "date_iot" => self.date_iot.cmp(&other.date_iot),
            _ => self.id.cmp(&other.id),
        }
    }
}
