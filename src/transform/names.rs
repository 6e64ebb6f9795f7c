//! Fixed reference lists for name replacement.
//!
//! The lists are part of the output contract: changing them changes every
//! transformed slice, so entries are only ever appended.

pub const GIVEN_NAMES: &[&str] = &[
    "Aaron", "Abigail", "Adam", "Adrian", "Aisha", "Alan", "Albert", "Alice", "Amelia", "Amir",
    "Andrea", "Angela", "Anna", "Anthony", "Arthur", "Ava", "Barbara", "Benjamin", "Bernard",
    "Beatrice", "Brian", "Bruno", "Caleb", "Camila", "Carlos", "Caroline", "Charles", "Charlotte",
    "Chloe", "Christopher", "Clara", "Daniel", "David", "Diana", "Dorothy", "Edward", "Eleanor",
    "Elena", "Elijah", "Elizabeth", "Emily", "Emma", "Eric", "Ethan", "Eva", "Felix", "Fiona",
    "Frances", "Gabriel", "George", "Grace", "Hannah", "Harold", "Helen", "Henry", "Isaac",
    "Isabella", "Ivan", "Jack", "James", "Jane", "Jasmine", "Jennifer", "Jessica", "John",
    "Joseph", "Julia", "Karen", "Kevin", "Laura", "Leo", "Liam", "Lily", "Linda", "Lucas",
    "Lucy", "Margaret", "Maria", "Mark", "Martha", "Mason", "Matthew", "Maya", "Michael", "Mia",
    "Nathan", "Nina", "Noah", "Olivia", "Oscar", "Patricia", "Paul", "Peter", "Rachel", "Robert",
    "Rosa", "Ruth", "Samuel", "Sarah", "Sofia", "Susan", "Thomas", "Victoria", "William", "Zoe",
];

pub const SURNAMES: &[&str] = &[
    "Adams", "Allen", "Anderson", "Bailey", "Baker", "Barnes", "Bell", "Bennett", "Brooks",
    "Brown", "Butler", "Campbell", "Carter", "Clark", "Collins", "Cook", "Cooper", "Cox",
    "Cruz", "Davis", "Diaz", "Edwards", "Evans", "Fisher", "Flores", "Foster", "Garcia", "Gomez",
    "Gonzalez", "Gray", "Green", "Hall", "Harris", "Hayes", "Hernandez", "Hill", "Howard",
    "Hughes", "Jackson", "James", "Jenkins", "Johnson", "Jones", "Kelly", "Kim", "King", "Lee",
    "Lewis", "Long", "Lopez", "Martin", "Martinez", "Miller", "Mitchell", "Moore", "Morgan",
    "Morris", "Murphy", "Myers", "Nelson", "Nguyen", "Ortiz", "Parker", "Patel", "Perez",
    "Perry", "Peterson", "Phillips", "Powell", "Price", "Ramirez", "Reed", "Reyes", "Richardson",
    "Rivera", "Roberts", "Robinson", "Rodriguez", "Rogers", "Ross", "Russell", "Sanchez",
    "Sanders", "Scott", "Smith", "Stewart", "Sullivan", "Taylor", "Thomas", "Thompson", "Torres",
    "Turner", "Walker", "Ward", "Watson", "White", "Williams", "Wilson", "Wood", "Wright",
    "Young",
];

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashSet;

    #[test]
    fn test_lists_have_no_duplicates() {
        let given: AHashSet<_> = GIVEN_NAMES.iter().collect();
        assert_eq!(given.len(), GIVEN_NAMES.len());
        let surnames: AHashSet<_> = SURNAMES.iter().collect();
        assert_eq!(surnames.len(), SURNAMES.len());
    }

    #[test]
    fn test_entries_are_single_tokens() {
        for name in GIVEN_NAMES.iter().chain(SURNAMES) {
            assert!(!name.contains(char::is_whitespace), "{name}");
        }
    }
}
