use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::models::Territory;

/// Shorter location inputs are never matched
pub const MIN_LOCATION_LEN: usize = 2;

/// Added to compound ("name, country") scores so they always beat name-only matches
const COMPOUND_BONUS: usize = 100;

/// Best territory for a location string, with the hint shown next to the field
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult<'a> {
    pub territory: Option<&'a Territory>,
    pub hint: String,
}

impl<'a> MatchResult<'a> {
    pub fn empty() -> Self {
        Self {
            territory: None,
            hint: String::new(),
        }
    }

    fn suggest(territory: &'a Territory) -> Self {
        Self {
            territory: Some(territory),
            hint: format_hint(territory),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.territory.is_none()
    }
}

/// "→ Dakar (Senegal)"
pub fn format_hint(territory: &Territory) -> String {
    format!("→ {} ({})", territory.name, territory.country)
}

/// Decompose, drop combining marks, lowercase ("Sénégal" -> "senegal").
/// Letters without a decomposition are kept as they are.
fn normalize(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

fn either_contains(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// Score every territory against `location` and return the strictly highest one.
///
/// A territory whose name contains, or is contained by, the input scores the name's
/// length; one whose "name, country" form does scores that length plus 100. On equal
/// scores the earlier territory in the list wins. Inputs shorter than
/// [`MIN_LOCATION_LEN`] characters never match.
pub fn best_match<'a>(location: &str, territories: &'a [Territory]) -> Option<(&'a Territory, usize)> {
    if location.chars().count() < MIN_LOCATION_LEN {
        return None;
    }

    let input = normalize(location);
    let mut best: Option<(&Territory, usize)> = None;

    for territory in territories {
        let name = normalize(&territory.name);
        let compound = format!("{}, {}", name, normalize(&territory.country));

        let mut score = 0;
        if either_contains(&input, &name) {
            score = name.chars().count();
        }
        if either_contains(&input, &compound) {
            score = compound.chars().count() + COMPOUND_BONUS;
        }

        let best_score = best.map(|(_, s)| s).unwrap_or(0);
        if score > best_score {
            best = Some((territory, score));
        }
    }

    if let Some((territory, score)) = best {
        debug!(
            "Location {:?} matched territory {} ({}) with score {}",
            location, territory.name, territory.country, score
        );
    }

    best
}

/// Suggest a territory for `location` unless the best match is already `selected`
pub fn match_territory<'a>(
    location: &str,
    territories: &'a [Territory],
    selected: Option<Uuid>,
) -> MatchResult<'a> {
    match best_match(location, territories) {
        Some((territory, _)) if selected != Some(territory.id) => MatchResult::suggest(territory),
        _ => MatchResult::empty(),
    }
}

/// Territory selection of a metadata form, kept in step with its location field.
///
/// A new best match replaces the selection and sets the hint. No match clears the
/// hint but keeps whatever was selected, including a manual choice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerritoryAutofill {
    selected: Option<Uuid>,
    hint: String,
}

impl TerritoryAutofill {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// The user picked a territory from the list themselves
    pub fn select_manually(&mut self, territory_id: Option<Uuid>) {
        self.selected = territory_id;
        self.hint.clear();
    }

    /// Re-run matching after the location text changed
    pub fn on_location_changed(&mut self, location: &str, territories: &[Territory]) {
        if location.chars().count() < MIN_LOCATION_LEN || territories.is_empty() {
            return;
        }

        match best_match(location, territories) {
            Some((territory, _)) if self.selected != Some(territory.id) => {
                self.selected = Some(territory.id);
                self.hint = format_hint(territory);
            }
            Some(_) => {}
            None => self.hint.clear(),
        }
    }
}
