//! Prompt text: the system prompt and the per-observation element list.

use droidloop_config::GameProfile;
use droidloop_core::observation::{DetectedElement, Observation, ScreenInfo};

/// Render the system prompt for a session.
pub fn build_system_prompt(screen: ScreenInfo, profile: &GameProfile, detection_enabled: bool) -> String {
    let w = screen.width;
    let h = screen.height;

    let perception = if detection_enabled {
        "## UI Element Detection\n\
Each screenshot shows numbered bounding boxes around detected UI elements. You also receive a text list of elements with their IDs, types, descriptions, and whether they are interactive.\n\
\n\
**ALWAYS use `tap_element(element_id=N)` to interact with elements.** This is the most reliable way to tap: it uses the exact centre of the detected element's bounding box. To find the right element, look at the screenshot, find the item you want to tap, and read the number label drawn on or near it.\n\
\n\
**IMPORTANT:** The element descriptions are auto-generated and often wrong (a playing card may be described as \"fire hydrant\"). Match elements by their VISUAL POSITION in the screenshot, not by description.\n\
\n\
Use `tap(x, y)` ONLY as a last resort when no element bounding box covers your target."
            .to_string()
    } else {
        format!(
            "## Coordinate Estimation\n\
There is no element detection, so you must estimate pixel coordinates visually.\n\
- Elements near the bottom of the screen have LARGE y values (close to {h})\n\
- To estimate: visually locate the element, calculate its position as a fraction of {w}x{h}\n\
- Example: an element 80% down the screen has y = {}",
            (h as f64 * 0.8) as u32
        )
    };

    let mut game = profile.system_context.trim().to_string();
    if !profile.rules.trim().is_empty() {
        game.push_str(&format!("\n\n## Game Rules\n{}", profile.rules.trim()));
    }
    if !profile.tips.trim().is_empty() {
        game.push_str(&format!("\n\n## Strategy Tips\n{}", profile.tips.trim()));
    }

    format!(
        "You are an AI agent playing a game on an Android phone. You analyze screenshots and take actions using the provided tools.

## Screen Information
- Screen resolution: {w}x{h} pixels
- Coordinate system: (0,0) is top-left, ({x_max},{y_max}) is bottom-right
- X increases left to right, Y increases top to bottom

{perception}

## Game Context
{game}

## How to Act
- Each turn you receive a screenshot of the current game state.
- You can call SEVERAL tools in one turn. They run in order; afterwards you see the resulting screen.
- For multi-step actions (like selecting a number and then tapping PLAY), call each step as a separate tool.
- If a result says the screen did NOT change, your target was probably wrong. Try a different element or different coordinates.
- If it is NOT your turn (other players are acting), or a loading screen or animation is shown, use the wait tool.

## Important
- When the game ends (final score screen, game over), call end_session with a description of the final state.
- Dismiss ads by tapping X/close buttons or elements labeled close/dismiss. Do NOT tap ad content.
- If a popup or dialog appears, handle it before continuing gameplay.
- Be precise: prefer tap_element over tap when the element is detected.",
        x_max = w.saturating_sub(1),
        y_max = h.saturating_sub(1),
    )
}

/// Render the element list sent with every observation.
///
/// Elements whose centre falls in the bottom `ignore_bottom_fraction` of the
/// screen (the ad-banner band) are left out.
pub fn format_elements(elements: &[DetectedElement], screen_height: u32, ignore_bottom_fraction: f32) -> String {
    if elements.is_empty() {
        return "No UI elements detected. Use tap(x, y) with estimated coordinates.".into();
    }

    let cutoff = (screen_height as f32 * (1.0 - ignore_bottom_fraction.clamp(0.0, 1.0))) as u32;

    let mut lines = vec!["Detected UI elements (use tap_element with the element ID):".to_string()];
    for el in elements {
        let center = el.center();
        if ignore_bottom_fraction > 0.0 && center.y > cutoff {
            continue;
        }
        lines.push(format!(
            "  [{}] {}: \"{}\" at {} size {}x{}{}",
            el.id,
            el.kind,
            el.label,
            center,
            el.bbox.width(),
            el.bbox.height(),
            if el.interactive { " [INTERACTIVE]" } else { "" },
        ));
    }
    lines.join("\n")
}

/// Text accompanying an observation in the history.
///
/// `screen_height` is the device's, not the uploaded image's, which may be
/// downscaled.
pub fn observation_text(observation: &Observation, screen_height: u32, ignore_bottom_fraction: f32) -> String {
    let listing = match &observation.elements {
        Some(elements) => format_elements(elements, screen_height, ignore_bottom_fraction),
        None => "Element detection unavailable for this screen. Use tap(x, y) with estimated coordinates."
            .to_string(),
    };
    format!("Step {}: here is the current screen.\n\n{listing}", observation.step)
}

/// Appended to the system prompt when screenshots are downscaled for upload.
pub fn resized_image_note(screen: ScreenInfo) -> String {
    format!(
        "\n\n## Image Scale\nScreenshots are shown downscaled. Always give coordinates in device pixels \
         on the full {}x{} screen, not in pixels of the image you see.",
        screen.width, screen.height
    )
}
