//! Keyword table mapping a debate topic to a category, tone and example lines.

/// How a zinger for a given kind of topic should sound
#[derive(Debug, PartialEq, Eq)]
pub struct TopicVibe {
    pub category: &'static str,
    pub tone: &'static str,
    pub style: &'static str,
    /// Lowercase substrings; any match selects this vibe
    pub keywords: &'static [&'static str],
    pub examples: [&'static str; 3],
}

/// Checked in order; the first vibe with a matching keyword wins
pub static VIBES: &[TopicVibe] = &[
    TopicVibe {
        category: "political",
        tone: "sharp but respectful",
        style: "witty political commentary",
        keywords: &[
            "trump", "biden", "election", "democrat", "republican", "politics", "government",
            "vote", "president",
        ],
        examples: [
            "At least my side doesn't need a fact-checker on speed dial.",
            "Your side's logic is more twisted than a campaign promise.",
            "My side actually reads the fine print before voting.",
        ],
    },
    TopicVibe {
        category: "food",
        tone: "playful and foodie",
        style: "culinary sass",
        keywords: &[
            "food", "pizza", "hotdog", "sandwich", "pineapple", "cooking", "restaurant", "eat",
            "taste",
        ],
        examples: [
            "Your taste buds clearly need a GPS because they're lost.",
            "My side has actual flavor - yours is as bland as unsalted crackers.",
            "At least my choice doesn't make Gordon Ramsay cry.",
        ],
    },
    TopicVibe {
        category: "tech",
        tone: "nerdy and clever",
        style: "tech-savvy roasting",
        keywords: &[
            "iphone", "android", "apple", "samsung", "gaming", "console", "pc", "tech", "app",
            "social media", "tiktok", "instagram",
        ],
        examples: [
            "Your choice is more outdated than Internet Explorer.",
            "My side actually gets software updates this decade.",
            "At least my team doesn't need a manual to figure it out.",
        ],
    },
    TopicVibe {
        category: "sports",
        tone: "competitive and energetic",
        style: "sports trash talk",
        keywords: &[
            "sport", "football", "basketball", "soccer", "baseball", "team", "player", "game",
            "championship",
        ],
        examples: [
            "Your team's strategy is weaker than their defense.",
            "My side actually shows up when it matters.",
            "At least my choice doesn't choke in the playoffs.",
        ],
    },
    TopicVibe {
        category: "entertainment",
        tone: "pop culture savvy",
        style: "entertainment industry shade",
        keywords: &[
            "movie", "music", "celebrity", "netflix", "disney", "marvel", "star wars", "tv show",
            "series",
        ],
        examples: [
            "Your choice has more plot holes than a Michael Bay movie.",
            "My side actually has character development.",
            "At least my pick doesn't need a reboot every five years.",
        ],
    },
    TopicVibe {
        category: "relationships",
        tone: "cheeky and relatable",
        style: "dating app wisdom",
        keywords: &[
            "dating", "relationship", "love", "marriage", "boyfriend", "girlfriend", "tinder",
            "romance",
        ],
        examples: [
            "Your choice is a bigger red flag than lying about your age.",
            "My side actually knows how to commit.",
            "At least my pick doesn't ghost you after three dates.",
        ],
    },
    TopicVibe {
        category: "workplace",
        tone: "office humor",
        style: "corporate comedy",
        keywords: &[
            "work", "office", "job", "boss", "meeting", "remote", "zoom", "email", "corporate",
        ],
        examples: [
            "Your side is like a Monday morning meeting - nobody wants it.",
            "My choice actually increases productivity instead of killing it.",
            "At least my team doesn't need three meetings to decide on lunch.",
        ],
    },
    TopicVibe {
        category: "lifestyle",
        tone: "fashionably fierce",
        style: "style guru shade",
        keywords: &[
            "fashion", "style", "clothes", "brand", "shopping", "trend", "outfit", "shoes",
        ],
        examples: [
            "Your choice went out of style faster than low-rise jeans.",
            "My side actually understands what looks good.",
            "At least my pick doesn't scream 'I shop at gas stations.'",
        ],
    },
    TopicVibe {
        category: "silly",
        tone: "absurdly hilarious",
        style: "random chaos energy",
        keywords: &[
            "weird", "random", "silly", "funny", "strange", "toilet paper", "cereal", "socks",
        ],
        examples: [
            "Your choice makes about as much sense as pineapple on pizza.",
            "My side has the chaotic energy this world needs.",
            "At least my pick doesn't make people question reality.",
        ],
    },
];

pub static GENERAL: TopicVibe = TopicVibe {
    category: "general",
    tone: "cleverly sarcastic",
    style: "witty observation",
    keywords: &[],
    examples: [
        "Your side's logic is more questionable than a 3 AM text.",
        "My choice actually makes sense to people with functioning brain cells.",
        "At least my team doesn't need a GPS to find common sense.",
    ],
};

/// Pick the vibe for a topic by case-insensitive substring match
pub fn classify_topic(topic: &str) -> &'static TopicVibe {
    let topic = topic.to_lowercase();
    VIBES
        .iter()
        .find(|vibe| vibe.keywords.iter().any(|k| topic.contains(k)))
        .unwrap_or(&GENERAL)
}
