use std::fmt::Write;

use recipe_rag::EnrichedRecipe;

/// Plain-text report for one recipe, closed by a separator line.
pub fn render_recipe(recipe: &EnrichedRecipe) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nRecipe {}:", recipe.rank);
    let _ = writeln!(out, "\n{}", recipe.title);
    let _ = writeln!(out, "\nTotal Cost: ${:.2}", recipe.total_cost);
    let _ = writeln!(out, "Cost per serving: ${:.2}", recipe.cost_per_serving);
    let _ = writeln!(out, "Makes {} servings\n", recipe.servings);

    out.push_str("Ingredients:\n");
    for item in ingredient_items(&recipe.ingredients) {
        let _ = writeln!(out, "• {item}");
    }

    let info = &recipe.nutrition_info;
    out.push_str("\nNutritional Information (per serving):\n");
    let _ = writeln!(out, "Calories: {}kcal", info.calories);
    let _ = writeln!(out, "Protein: {}g", info.protein);
    let _ = writeln!(out, "Carbohydrates: {}g", info.carbohydrates);
    let _ = writeln!(out, "Fat: {}g", info.fat);
    let _ = writeln!(out, "Sugar: {}g", info.sugar);
    let _ = writeln!(out, "Fiber: {}g", info.fiber);

    out.push_str("\nVitamins:\n");
    for (name, amount) in &info.vitamins {
        let _ = writeln!(out, "{name}: {amount}mg");
    }
    out.push_str("\nMinerals:\n");
    for (name, amount) in &info.minerals {
        let _ = writeln!(out, "{name}: {amount}mg");
    }

    out.push_str("\nInstructions:\n");
    for (idx, step) in instruction_steps(&recipe.instructions).enumerate() {
        let _ = writeln!(out, "{}. {step}", idx + 1);
    }
    let _ = writeln!(out, "\n{}", "-".repeat(80));
    out
}

fn ingredient_items(ingredients: &str) -> impl Iterator<Item = &str> {
    ingredients
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

fn instruction_steps(instructions: &str) -> impl Iterator<Item = &str> {
    instructions
        .split(['.', ';'])
        .map(str::trim)
        .filter(|step| !step.is_empty())
}
