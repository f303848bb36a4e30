//! `predict_from_coords` payload validation
//!
//! Every problem is collected so the client sees all field errors at once.

use analysis::TaskType;
use serde_json::{Map, Value};
use tile_mosaic::{GeoBoundingBox, LatLng, UrlTemplate, MAX_ZOOM};

use crate::error::FieldError;

/// Web-mercator latitude limit
const MAX_LATITUDE: f64 = 85.0511;

/// A validated map-viewport analysis request
#[derive(Debug, Clone, PartialEq)]
pub enum CoordsRequest {
    Single {
        task: TaskType,
        bbox: GeoBoundingBox,
        template: UrlTemplate,
    },
    Change {
        bbox: GeoBoundingBox,
        before: UrlTemplate,
        after: UrlTemplate,
    },
}

impl CoordsRequest {
    pub fn task(&self) -> TaskType {
        match self {
            CoordsRequest::Single { task, .. } => *task,
            CoordsRequest::Change { .. } => TaskType::ChangeDetection,
        }
    }
}

pub fn validate_coords_request(body: &Value) -> Result<CoordsRequest, Vec<FieldError>> {
    let Some(object) = body.as_object() else {
        return Err(vec![FieldError::new("body", "must be a JSON object")]);
    };

    let mut errors = Vec::new();
    let task = task_type(object, &mut errors);
    let south_west = corner(object, "southWest", &mut errors);
    let north_east = corner(object, "northEast", &mut errors);
    let zoom = zoom(object, &mut errors);

    let templates = match task {
        Some(TaskType::ChangeDetection) => {
            let before = template(object, "beforeTileUrl", &mut errors);
            let after = template(object, "afterTileUrl", &mut errors);
            before.zip(after).map(|(before, after)| (before, Some(after)))
        }
        Some(_) => template(object, "tileUrlTemplate", &mut errors).map(|t| (t, None)),
        None => None,
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    match (task, south_west, north_east, zoom, templates) {
        (Some(TaskType::ChangeDetection), Some(sw), Some(ne), Some(zoom), Some((before, Some(after)))) => {
            Ok(CoordsRequest::Change {
                bbox: GeoBoundingBox::new(sw, ne, zoom),
                before,
                after,
            })
        }
        (Some(task), Some(sw), Some(ne), Some(zoom), Some((template, None))) => Ok(CoordsRequest::Single {
            task,
            bbox: GeoBoundingBox::new(sw, ne, zoom),
            template,
        }),
        _ => Err(vec![FieldError::new("body", "incomplete request")]),
    }
}

fn task_type(object: &Map<String, Value>, errors: &mut Vec<FieldError>) -> Option<TaskType> {
    match object.get("task_type") {
        None | Some(Value::Null) => {
            errors.push(FieldError::new("task_type", "field required"));
            None
        }
        Some(Value::String(raw)) => match raw.parse() {
            Ok(task) => Some(task),
            Err(_) => {
                let expected: Vec<&str> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
                errors.push(FieldError::new(
                    "task_type",
                    format!("must be one of {}", expected.join(", ")),
                ));
                None
            }
        },
        Some(_) => {
            errors.push(FieldError::new("task_type", "must be a string"));
            None
        }
    }
}

fn corner(object: &Map<String, Value>, name: &str, errors: &mut Vec<FieldError>) -> Option<LatLng> {
    let point = match object.get(name) {
        None | Some(Value::Null) => {
            errors.push(FieldError::new(name, "field required"));
            return None;
        }
        Some(Value::Object(point)) => point,
        Some(_) => {
            errors.push(FieldError::new(name, "must be an object with lat and lng"));
            return None;
        }
    };

    let lat = coordinate(point, name, "lat", MAX_LATITUDE, errors);
    let lng = coordinate(point, name, "lng", 180.0, errors);
    Some(LatLng::new(lat?, lng?))
}

fn coordinate(
    point: &Map<String, Value>,
    parent: &str,
    name: &str,
    limit: f64,
    errors: &mut Vec<FieldError>,
) -> Option<f64> {
    let field = format!("{}.{}", parent, name);
    match point.get(name) {
        None | Some(Value::Null) => {
            errors.push(FieldError::new(field, "field required"));
            None
        }
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if (-limit..=limit).contains(&v) => Some(v),
            _ => {
                errors.push(FieldError::new(
                    field,
                    format!("must be between {} and {}", -limit, limit),
                ));
                None
            }
        },
        Some(_) => {
            errors.push(FieldError::new(field, "must be a number"));
            None
        }
    }
}

fn zoom(object: &Map<String, Value>, errors: &mut Vec<FieldError>) -> Option<u8> {
    match object.get("zoom") {
        None | Some(Value::Null) => {
            errors.push(FieldError::new("zoom", "field required"));
            None
        }
        Some(Value::Number(n)) => match n.as_u64() {
            Some(z) if z <= u64::from(MAX_ZOOM) => Some(z as u8),
            _ => {
                errors.push(FieldError::new(
                    "zoom",
                    format!("must be an integer between 0 and {}", MAX_ZOOM),
                ));
                None
            }
        },
        Some(_) => {
            errors.push(FieldError::new("zoom", "must be an integer"));
            None
        }
    }
}

fn template(object: &Map<String, Value>, name: &str, errors: &mut Vec<FieldError>) -> Option<UrlTemplate> {
    match object.get(name) {
        None | Some(Value::Null) => {
            errors.push(FieldError::new(name, "field required"));
            None
        }
        Some(Value::String(raw)) => match UrlTemplate::parse(raw) {
            Ok(template) => Some(template),
            Err(e) => {
                errors.push(FieldError::new(name, e.to_string()));
                None
            }
        },
        Some(_) => {
            errors.push(FieldError::new(name, "must be a string"));
            None
        }
    }
}
