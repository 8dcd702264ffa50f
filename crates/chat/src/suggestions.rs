use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};

pub const DEFAULT_SUGGESTION_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuggestionCategory {
    Technology,
    Creativity,
    Professional,
    Education,
}

impl SuggestionCategory {
    pub const ALL: [Self; 4] = [
        Self::Technology,
        Self::Creativity,
        Self::Professional,
        Self::Education,
    ];

    pub const fn prompts(self) -> &'static [&'static str] {
        match self {
            Self::Technology => &[
                "What can you tell me about quantum computing?",
                "Explain the difference between AI, ML, and deep learning",
                "Compare React, Angular, and Vue.js frameworks",
                "Tell me about the latest advancements in robotics",
                "What is Web3 and how is it different from the current web?",
                "Explain blockchain technology in simple terms",
                "What are the ethical concerns around AI development?",
            ],
            Self::Creativity => &[
                "Write a creative story about time travel",
                "Generate a poem about the night sky",
                "Create a short sci-fi plot about AI consciousness",
                "Help me write a song about new beginnings",
                "Describe an alien world with unique physical laws",
                "Write a creative description for a fantasy character",
                "Generate a murder mystery scenario",
            ],
            Self::Professional => &[
                "Write a professional email for a job application",
                "Draft a business proposal for a tech startup",
                "Create a project timeline for software development",
                "Help me write a professional LinkedIn summary",
                "Generate a product description for a new smartphone",
                "Write a company mission statement for a sustainability startup",
                "Draft a professional networking message",
            ],
            Self::Education => &[
                "Explain the theory of relativity in simple terms",
                "Help me understand photosynthesis",
                "What are the key events of World War II?",
                "Explain how the human immune system works",
                "Give me a summary of macroeconomics basics",
                "Explain the process of climate change",
                "What are the main philosophical schools of thought?",
            ],
        }
    }
}

pub fn random_suggestions(count: usize) -> Vec<&'static str> {
    random_suggestions_with(&mut rand::rng(), count)
}

/// One prompt per category first, then distinct prompts from the whole pool.
/// Asking for more than the pool holds returns the whole pool.
pub fn random_suggestions_with<R>(rng: &mut R, count: usize) -> Vec<&'static str>
where
    R: Rng + ?Sized,
{
    let mut picked: Vec<&'static str> = SuggestionCategory::ALL
        .iter()
        .take(count)
        .filter_map(|category| category.prompts().choose(&mut *rng).copied())
        .collect();

    if picked.len() < count {
        let mut rest: Vec<&'static str> = SuggestionCategory::ALL
            .iter()
            .flat_map(|category| category.prompts().iter().copied())
            .filter(|prompt| !picked.contains(prompt))
            .collect();
        rest.shuffle(rng);
        picked.extend(rest.into_iter().take(count - picked.len()));
    }

    picked
}
