use crate::error::RepsError;
use crate::exercise::Exercise;
use include_dir::{include_dir, Dir};
use serde::Deserialize;
use serde_json::from_str;
use std::collections::HashMap;

static CATALOG_DIR: Dir = include_dir!("src/catalog");

/// An ordered list of exercise ids plus identity. Immutable for the duration
/// of a session.
#[derive(Deserialize, Clone, Debug)]
pub struct Workout {
    pub id: String,
    pub name: String,
    pub exercises: Vec<String>,
}

/// The static exercise/workout catalog, loaded once at startup and passed by
/// reference into the session runner.
#[derive(Debug)]
pub struct WorkoutLibrary {
    exercises: HashMap<String, Exercise>,
    workouts: Vec<Workout>,
}

fn catalog_file(name: &str) -> &'static str {
    CATALOG_DIR
        .get_file(name)
        .expect("catalog file not found")
        .contents_utf8()
        .expect("catalog file is not utf-8")
}

impl WorkoutLibrary {
    /// Parse and validate the embedded catalog.
    pub fn load() -> Result<Self, RepsError> {
        let exercises: Vec<Exercise> = from_str(catalog_file("exercises.json"))
            .map_err(|e| RepsError::Catalog(format!("exercises.json: {e}")))?;
        let workouts: Vec<Workout> = from_str(catalog_file("workouts.json"))
            .map_err(|e| RepsError::Catalog(format!("workouts.json: {e}")))?;

        Self::build(exercises, workouts)
    }

    /// Assemble a library from already-parsed content. Used directly by tests
    /// that need synthetic catalogs.
    pub fn build(exercises: Vec<Exercise>, workouts: Vec<Workout>) -> Result<Self, RepsError> {
        let mut by_id = HashMap::new();
        for ex in exercises {
            if ex.sets < 1 {
                return Err(RepsError::Catalog(format!("{}: sets must be >= 1", ex.id)));
            }
            if !ex.uses_tracking && ex.set_duration.is_none() {
                return Err(RepsError::Catalog(format!(
                    "{}: untracked exercise needs a set_duration",
                    ex.id
                )));
            }
            if by_id.insert(ex.id.clone(), ex).is_some() {
                return Err(RepsError::Catalog("duplicate exercise id".to_string()));
            }
        }

        for w in &workouts {
            if w.exercises.is_empty() {
                return Err(RepsError::Catalog(format!("{}: workout is empty", w.id)));
            }
            for ex_id in &w.exercises {
                if !by_id.contains_key(ex_id) {
                    return Err(RepsError::Catalog(format!(
                        "{}: unknown exercise {ex_id}",
                        w.id
                    )));
                }
            }
        }

        Ok(Self {
            exercises: by_id,
            workouts,
        })
    }

    pub fn workout(&self, id: &str) -> Result<&Workout, RepsError> {
        self.workouts
            .iter()
            .find(|w| w.id == id)
            .ok_or_else(|| RepsError::WorkoutNotFound(id.to_string()))
    }

    pub fn exercise(&self, id: &str) -> Option<&Exercise> {
        self.exercises.get(id)
    }

    pub fn workouts(&self) -> impl Iterator<Item = &Workout> {
        self.workouts.iter()
    }

    /// Resolve a workout's exercise ids into catalog entries, in order.
    pub fn workout_exercises(&self, workout: &Workout) -> Vec<&Exercise> {
        workout
            .exercises
            .iter()
            .filter_map(|id| self.exercises.get(id))
            .collect()
    }
}
