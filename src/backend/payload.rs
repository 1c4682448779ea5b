//! Multipart body for property updates.
//!
//! Scalars go as text parts, booleans as the literal strings `true`/`false`,
//! every amenity id as its own `amenities` part and every new image as its own
//! `images` file part. Images that are already stored (plain URL strings) are
//! not sent again.

use base64::Engine;
use serde_json::{Map, Number, Value};

use crate::error::{AppError, AppResult};
use crate::identity::id_string;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Number(Number),
}

impl FieldValue {
    /// Wire form of the value.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Flag(true) => "true".to_string(),
            FieldValue::Flag(false) => "false".to_string(),
            FieldValue::Number(n) => n.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Flag(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePayload {
    fields: Vec<(String, FieldValue)>,
    amenities: Vec<String>,
    images: Vec<ImageUpload>,
}

impl UpdatePayload {
    pub fn new() -> Self { Self::default() }

    pub fn text<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set(key.into(), FieldValue::Text(value.into()));
        self
    }

    pub fn flag<K: Into<String>>(mut self, key: K, value: bool) -> Self {
        self.set(key.into(), FieldValue::Flag(value));
        self
    }

    pub fn number<K: Into<String>, N: Into<Number>>(mut self, key: K, value: N) -> Self {
        self.set(key.into(), FieldValue::Number(value.into()));
        self
    }

    pub fn amenity<S: Into<String>>(mut self, id: S) -> Self {
        self.amenities.push(id.into());
        self
    }

    pub fn image(mut self, upload: ImageUpload) -> Self {
        self.images.push(upload);
        self
    }

    fn set(&mut self, key: String, value: FieldValue) {
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn fields(&self) -> &[(String, FieldValue)] { &self.fields }

    pub fn amenities(&self) -> &[String] { &self.amenities }

    pub fn images(&self) -> &[ImageUpload] { &self.images }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Build from an edit-form JSON object.
    ///
    /// `amenities` is a list of ids (or `{amen_id|id}` objects). `images` is a
    /// list where strings are already-stored URLs and objects
    /// `{file_name, content_type, data_base64}` are new uploads. Null fields
    /// are left out. A title is required.
    pub fn from_form(form: &Map<String, Value>) -> AppResult<Self> {
        let mut p = UpdatePayload::new();
        for (key, value) in form {
            match key.as_str() {
                "amenities" => p.amenities = amenity_ids(value)?,
                "images" => p.images = image_uploads(value)?,
                _ => match value {
                    Value::Null => {}
                    Value::Bool(b) => p.set(key.clone(), FieldValue::Flag(*b)),
                    Value::Number(n) => p.set(key.clone(), FieldValue::Number(n.clone())),
                    Value::String(s) => p.set(key.clone(), FieldValue::Text(s.clone())),
                    Value::Array(_) | Value::Object(_) => {
                        return Err(AppError::validation("invalid_field".to_string(), format!("Field '{}' must be a single value.", key)));
                    }
                },
            }
        }
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> AppResult<()> {
        match self.field("title") {
            Some(FieldValue::Text(t)) if !t.trim().is_empty() => Ok(()),
            _ => Err(AppError::validation("title_required", "Property title is required")),
        }
    }

    /// Every part in send order as `(name, text)`; image parts carry the file name.
    pub fn text_parts(&self) -> Vec<(String, String)> {
        let mut parts: Vec<(String, String)> = self.fields.iter().map(|(k, v)| (k.clone(), v.render())).collect();
        parts.extend(self.amenities.iter().map(|a| ("amenities".to_string(), a.clone())));
        parts.extend(self.images.iter().map(|i| ("images".to_string(), i.file_name.clone())));
        parts
    }
}

fn amenity_ids(value: &Value) -> AppResult<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(AppError::validation("invalid_amenities", "Amenities must be a list."));
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::Object(m) => m.get("amen_id").or_else(|| m.get("id")).and_then(id_string),
            other => id_string(other),
        })
        .collect())
}

fn image_uploads(value: &Value) -> AppResult<Vec<ImageUpload>> {
    let Value::Array(items) = value else {
        return Err(AppError::validation("invalid_images", "Images must be a list."));
    };
    let mut out = Vec::new();
    for item in items {
        let Value::Object(m) = item else { continue };
        let data = m.get("data_base64").and_then(Value::as_str).unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| AppError::validation("invalid_image".to_string(), format!("Image data is not valid base64: {}", e)))?;
        out.push(ImageUpload {
            file_name: m.get("file_name").and_then(Value::as_str).unwrap_or("upload").to_string(),
            content_type: m.get("content_type").and_then(Value::as_str).unwrap_or("application/octet-stream").to_string(),
            bytes,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn form_becomes_repeated_parts() {
        let form = json!({
            "title": "Sea view",
            "price": 250000,
            "is_featured": false,
            "description": null,
            "amenities": [3, "7", {"amen_id": 9}],
            "images": ["/uploads/old.jpg", {"file_name": "new.png", "content_type": "image/png", "data_base64": "iVBO"}]
        });
        let p = UpdatePayload::from_form(form.as_object().unwrap()).unwrap();
        assert_eq!(p.field("is_featured").map(FieldValue::render).as_deref(), Some("false"));
        assert!(p.field("description").is_none());
        assert_eq!(p.amenities(), &["3", "7", "9"]);
        assert_eq!(p.images().len(), 1);
        let parts = p.text_parts();
        assert_eq!(parts.iter().filter(|(k, _)| k == "amenities").count(), 3);
        assert!(parts.contains(&("images".to_string(), "new.png".to_string())));
        assert!(parts.contains(&("price".to_string(), "250000".to_string())));
    }

    #[test]
    fn title_is_required() {
        let err = UpdatePayload::from_form(json!({"title": "  "}).as_object().unwrap()).unwrap_err();
        assert_eq!(err.message(), "Property title is required");
        assert!(UpdatePayload::new().flag("furnished", true).validate().is_err());
    }
}
