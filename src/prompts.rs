//! Fixed prompts for the food-photo exchange

/// Text of the user message when an image is sent without a note
pub const DEFAULT_IMAGE_PROMPT: &str = "Please analyze this image.";

/// Initial text of the placeholder shown while an image is analyzed
pub const ANALYZING_PLACEHOLDER: &str =
    "Analyzing image... this may take up to 30 seconds. Please wait.";

/// Phase 1: what is in the picture
pub const FOOD_IDENTIFICATION_PROMPT: &str = r#"You are a food recognition expert.
Please identify all the food items visible in this image.
List them clearly and describe their state (e.g., cooked, raw, leftover).
Be specific about quantities if possible."#;

/// Placeholder text while retry `attempt` (1-based) is running
pub fn retry_placeholder(attempt: u32) -> String {
    format!("Still processing... (attempt {})", attempt)
}

/// Identification prompt, with the user's own note appended when there is one
pub fn identification_prompt(user_note: Option<&str>) -> String {
    match user_note.map(str::trim).filter(|n| !n.is_empty()) {
        Some(note) => format!("{}\n\nThe user added: {}", FOOD_IDENTIFICATION_PROMPT, note),
        None => FOOD_IDENTIFICATION_PROMPT.to_string(),
    }
}

/// Phase 2: recipes conditioned on the identified items
pub fn recipe_prompt(food_items: &str) -> String {
    format!(
        r#"Based on the following food items:
{}

Please suggest 3 creative recipes that can be made using these ingredients.
For each recipe:
1. Provide a clear title
2. List all required ingredients (including any common pantry items needed)
3. Give step-by-step instructions
4. Mention approximate cooking time
5. Include any tips or variations

Format the response in a clear, easy-to-read way."#,
        food_items.trim()
    )
}

/// The single model message that closes a successful upload
pub fn combined_result(food_items: &str, recipes: &str) -> String {
    format!(
        "I've identified the following food items in your image:\n{}\n\nHere are some recipe suggestions:\n{}",
        food_items.trim(),
        recipes.trim()
    )
}
