/*!

This is the long-form manual for `vote_extraction` and `minutesvotes`.

## What is extracted

For every vote found in the minutes of a meeting, one record with:
* the agenda item (number and title)
* the outcome: `Pass`, `Fail`, `Tie`, `Continued` or `Withdrawn`. It is `null` when
  the wording of the result was not recognized.
* the tally (`ayes`, `noes`, `abstain`, `absent`, `recused`)
* the vote of each member, when the minutes list them
* the motion text, the mover and the seconder (`Unknown` when they cannot be matched
  to the roster)
* the provenance (`deterministic`, `fallback` or `merged`) and a confidence between 0 and 1.

A consent calendar approved with a single motion gives one record per item of the
calendar. Items pulled from the calendar are expected to have their own vote in the
minutes.

## Formats of minutes

### Roll call

```text
26. Approve Agreement with Acme
MOTION: Phan SECOND: Lopez
YES: 7 - Penaloza, Phan, Lopez, Bacerra, Hernandez, Mendoza, Sarmiento / NO: 0 / Status: 7-0-0-0 - Pass
```

Every status line is one vote. The numbers of the status line follow the `statusOrder`
of the vocabulary (ayes, noes, abstain, absent, recused by default).

### Narrative

```text
It was moved by Councilmember Smith, seconded by Councilmember Jones, to approve
Consent Calendar Item Nos. 8 through 12 with the exception of Item No. 10.
The motion carried 6-0.
```

Every motion sentence is one vote, followed by optional `AYES:`, `NOES:`, `ABSENT:`
lists. A vote recorded without a motion sentence is anchored on "the motion carried"
or on the `AYES:` list.

## City configuration

The configuration of a city is a JSON file:

```json
{
  "city": "santa_ana",
  "strategy": "rollCall",
  "rosterSize": 7,
  "lowConfidenceThreshold": 0.7,
  "maxEditDistance": 2,
  "excludedItemCategories": ["approval of minutes", "excused absence"],
  "ocrCorrections": [
    {"pattern": "Counci1", "replacement": "Council", "literal": true},
    {"pattern": "(?i)council\\s+member", "replacement": "Councilmember"}
  ],
  "vocabulary": {
    "outcomes": [{"phrase": "carried", "outcome": "Pass"}],
    "choiceLabels": [{"label": "AYES", "choice": "Aye"}],
    "statusOrder": ["Aye", "Nay", "Abstain", "Absent", "Recused"],
    "statusLabel": "Status",
    "consentKeywords": ["consent calendar"],
    "itemHeadingPattern": "^(\\d+)\\.\\s+(.+)$"
  },
  "weights": {
    "tally": 0.25, "uniqueness": 0.15, "roster": 0.2,
    "requiredFields": 0.2, "coverage": 0.2, "criticalFailureCap": 0.5
  },
  "members": [
    {"name": "Thai Viet Phan", "termStart": "2020-12-08", "variants": ["Phan"]},
    {"name": "Vicente Sarmiento", "termStart": "2016-12-06", "termEnd": "2022-12-05"}
  ]
}
```

Only `city` and `strategy` (`rollCall` or `narrative`) are required. A field of the
vocabulary that is present replaces the default list. The roster size is only used when
no member is in office on the date of the meeting.

OCR corrections are applied in order. A table where the replacement of a correction is
matched again by any pattern of the table, its own included, is rejected.

A custom `itemHeadingPattern` must capture the item number in the first group and the
title in the second one.

## Roster files

Members can also be listed in a CSV file, passed with `--roster`:

```text
canonical_name,term_start,term_end,name_variants
Thai Viet Phan,2020-12-08,,Phan|Thai Phan
Vicente Sarmiento,2016-12-06,2022-12-05,
```

## Validation

The candidate votes of a document are scored against five checks:
* `tally_arithmetic`: the tally matches the member votes and the size of the roster
* `uniqueness`: one record per item and motion type
* `roster_membership`: the voters are members in office on the date of the meeting
* `required_fields`: every record has an item number and an outcome
* `coverage`: every vote found in the text gave a record, and every item of a consent
  calendar has exactly one record.

The score is the weighted mean of the checks. It is capped at `criticalFailureCap` when
`uniqueness` or `required_fields` fail. Below `lowConfidenceThreshold`, the fallback
extractor is called when one is configured, and its answer is merged with the
deterministic records.

## Fallback

`--fallback-command` runs an external program. It receives on its standard input:

```json
{"identifier": "...", "city": "...", "meetingDate": "2023-01-17",
 "text": "...", "deterministic": {...}, "diagnostics": [...]}
```

where `deterministic` is the canonical document of the deterministic pass. It must
answer on its standard output with a canonical document.

`--fallback-file` replays a canonical document saved earlier, for every input.

## Command line

```bash
minutesvotes --config santa_ana.json --input minutes_2023-01-17.txt --out votes.json
```

Several inputs can be given. The date of a text input is taken from `--date`, or from a
`YYYY-MM-DD` in the name of the file. With `--input-type json`, an input is
an envelope `{"city": ..., "meetingDate": ..., "text": ..., "identifier": ...}`.

`--reference` compares the output with an expected canonical document and fails if they
differ.
*/
