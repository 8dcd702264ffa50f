pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.0-pro-vision";

/// Which upstream model family a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRoute {
    Text,
    Multimodal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiModels {
    pub text: String,
    pub vision: String,
}

impl Default for GeminiModels {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT_MODEL.to_string(),
            vision: DEFAULT_VISION_MODEL.to_string(),
        }
    }
}

impl GeminiModels {
    pub fn new(text: impl Into<String>, vision: impl Into<String>) -> Self {
        let defaults = Self::default();
        let text = text.into().trim().to_string();
        let vision = vision.into().trim().to_string();
        Self {
            text: if text.is_empty() { defaults.text } else { text },
            vision: if vision.is_empty() {
                defaults.vision
            } else {
                vision
            },
        }
    }

    pub fn for_route(&self, route: ModelRoute) -> &str {
        match route {
            ModelRoute::Text => &self.text,
            ModelRoute::Multimodal => &self.vision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_model_names_fall_back_to_defaults() {
        let models = GeminiModels::new("  ", "custom-vision");
        assert_eq!(models.for_route(ModelRoute::Text), DEFAULT_TEXT_MODEL);
        assert_eq!(models.for_route(ModelRoute::Multimodal), "custom-vision");
    }
}
